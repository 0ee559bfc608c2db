//! Queue worker task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;

use crate::queue::manager::QueueManager;

/// Handle kept by the manager for each running worker.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    pub stop: broadcast::Sender<()>,
    pub join: JoinHandle<()>,
    pub active: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn spawn(
        manager: Arc<QueueManager>,
        id: usize,
        poll_interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let (stop, stop_rx) = broadcast::channel(1);
        let active = Arc::new(AtomicBool::new(true));
        let join = tokio::spawn(run_worker(
            manager,
            id,
            poll_interval,
            Arc::clone(&active),
            stop_rx,
            shutdown,
        ));
        Self { stop, join, active }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

fn signalled(rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(rx.try_recv(), Err(TryRecvError::Empty))
}

/// Drain eligible items, then wait for a push, the poll tick, or a stop
/// signal. Stop signals are honoured between items only.
async fn run_worker(
    manager: Arc<QueueManager>,
    id: usize,
    poll_interval: Duration,
    active: Arc<AtomicBool>,
    mut stop: broadcast::Receiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(worker = id, "Queue worker starting");
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.tick().await;

    'outer: loop {
        while let Some(request) = manager.dequeue() {
            manager.process(request).await;
            if signalled(&mut stop) || signalled(&mut shutdown) {
                tracing::info!(worker = id, "Queue worker stopping after in-flight item");
                break 'outer;
            }
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = manager.queues().notified() => {}
            _ = stop.recv() => {
                tracing::info!(worker = id, "Queue worker received stop signal, exiting loop");
                break;
            }
            _ = shutdown.recv() => {
                tracing::info!(worker = id, "Queue worker received shutdown signal, exiting loop");
                break;
            }
        }
    }

    active.store(false, Ordering::Relaxed);
}
