//! Queue manager: enqueue, worker lifecycle and per-item processing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::clock::{elapsed, to_chrono};
use crate::domain::{DataJudRequest, DomainEvent, Priority, RequestStatus};
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::ports::RequestRepository;
use crate::queue::priority::{LaneCapacities, PriorityQueues};
use crate::queue::worker::WorkerHandle;
use crate::queue::{QueueError, QueueResult};
use crate::resilience::backoff::exponential_delay;
use crate::service::pipeline::Pipeline;

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub workers: usize,
    pub poll_interval: Duration,
    pub capacities: LaneCapacities,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Floor for the deferral after an admission denial.
    pub deferral_floor: Duration,
    pub pending_reload_limit: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            poll_interval: Duration::from_millis(100),
            capacities: LaneCapacities::default(),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(5 * 60),
            deferral_floor: Duration::from_secs(60),
            pending_reload_limit: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub total_queued: usize,
    pub processed: u64,
    pub completed: u64,
    pub cached: u64,
    pub failed: u64,
    pub retries: u64,
    pub deferrals: u64,
    pub average_processing_ms: f64,
    pub active_workers: usize,
    pub workers: usize,
}

/// How one dequeued item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Cached,
    /// Admission denied; back in the queue until the instant given.
    Deferred(chrono::DateTime<chrono::Utc>),
    /// Execution failed; back in the queue until the instant given.
    Retrying(chrono::DateTime<chrono::Utc>),
    Failed(&'static str),
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    completed: AtomicU64,
    cached: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    deferrals: AtomicU64,
    processing_ms: AtomicU64,
}

#[derive(Debug)]
pub struct QueueManager {
    queues: PriorityQueues,
    pipeline: Arc<Pipeline>,
    requests: Arc<dyn RequestRepository>,
    settings: QueueSettings,
    counters: Counters,
    workers: Mutex<HashMap<usize, WorkerHandle>>,
    next_worker_id: AtomicUsize,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: AtomicBool,
}

impl QueueManager {
    pub fn new(pipeline: Arc<Pipeline>, requests: Arc<dyn RequestRepository>, settings: QueueSettings) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queues: PriorityQueues::new(settings.capacities),
            pipeline,
            requests,
            settings,
            counters: Counters::default(),
            workers: Mutex::new(HashMap::new()),
            next_worker_id: AtomicUsize::new(0),
            shutdown_tx,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn queues(&self) -> &PriorityQueues {
        &self.queues
    }

    pub fn settings(&self) -> QueueSettings {
        self.settings
    }

    /// Persist, then append to the lane for the request's priority.
    pub async fn enqueue(&self, mut request: DataJudRequest) -> QueueResult<()> {
        if self.shutting_down.load(Ordering::Relaxed) {
            return Err(QueueError::ShuttingDown);
        }
        if !self.queues.has_room(request.priority) {
            return Err(QueueError::Full {
                priority: request.priority,
                capacity: self.settings.capacities.for_priority(request.priority),
            });
        }
        if request.status == RequestStatus::Retrying {
            let _ = request.requeue();
        }
        self.requests.save(&request).await?;
        tracing::debug!(request_id = %request.id, priority = %request.priority, "Request enqueued");
        self.queues.push(request)
    }

    pub fn dequeue(&self) -> Option<DataJudRequest> {
        self.queues.pop_eligible(self.pipeline.clock().now())
    }

    /// Reload persisted pending requests and spawn the worker pool.
    /// Returns how many requests were reloaded.
    pub async fn start(self: &Arc<Self>) -> QueueResult<usize> {
        let pending = self
            .requests
            .find_by_status(RequestStatus::Pending, self.settings.pending_reload_limit)
            .await?;
        let mut reloaded = 0;
        for request in pending {
            if self.queues.contains(request.id) {
                continue;
            }
            match self.queues.push(request) {
                Ok(()) => reloaded += 1,
                Err(e) => tracing::warn!(error = %e, "Pending request not reloaded"),
            }
        }

        for _ in 0..self.settings.workers {
            self.spawn_worker();
        }
        tracing::info!(workers = self.settings.workers, reloaded, "Queue manager started");
        Ok(reloaded)
    }

    /// Start one more worker. Returns its id.
    pub fn spawn_worker(self: &Arc<Self>) -> usize {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let handle = WorkerHandle::spawn(
            Arc::clone(self),
            id,
            self.settings.poll_interval,
            self.shutdown_tx.subscribe(),
        );
        self.workers.lock().insert(id, handle);
        id
    }

    /// Stop one worker and wait for its current item.
    pub async fn stop_worker(&self, id: usize) -> QueueResult<()> {
        let handle = self.workers.lock().remove(&id).ok_or(QueueError::WorkerNotFound(id))?;
        let _ = handle.stop.send(());
        self.queues.wake_all();
        if let Err(e) = handle.join.await {
            tracing::error!(worker = id, error = %e, "Queue worker task failed");
        }
        Ok(())
    }

    /// Stop accepting work, signal every worker and wait for in-flight items.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(());
        self.queues.wake_all();

        let handles: Vec<(usize, WorkerHandle)> = self.workers.lock().drain().collect();
        for (id, handle) in handles {
            if let Err(e) = handle.join.await {
                tracing::error!(worker = id, error = %e, "Queue worker task failed");
            }
        }
        tracing::info!(queued = self.queues.len(), "Queue manager stopped");
    }

    pub fn stats(&self) -> QueueStats {
        let processed = self.counters.processed.load(Ordering::Relaxed);
        let processing_ms = self.counters.processing_ms.load(Ordering::Relaxed);
        let workers = self.workers.lock();
        QueueStats {
            urgent: self.queues.len_for(Priority::Urgent),
            high: self.queues.len_for(Priority::High),
            normal: self.queues.len_for(Priority::Normal),
            low: self.queues.len_for(Priority::Low),
            total_queued: self.queues.len(),
            processed,
            completed: self.counters.completed.load(Ordering::Relaxed),
            cached: self.counters.cached.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            deferrals: self.counters.deferrals.load(Ordering::Relaxed),
            average_processing_ms: if processed == 0 {
                0.0
            } else {
                processing_ms as f64 / processed as f64
            },
            active_workers: workers.values().filter(|w| w.is_active()).count(),
            workers: workers.len(),
        }
    }

    /// Process one dequeued request to its next resting state.
    pub async fn process(&self, mut request: DataJudRequest) -> ProcessOutcome {
        let started = Instant::now();
        let request_type = request.request_type;
        let clock = Arc::clone(self.pipeline.clock());
        request.start_processing(clock.now());
        self.persist(&request).await;

        let outcome = match self.pipeline.lookup_cache(&request).await {
            Some(hit) => {
                request.mark_cached(hit.response, clock.now());
                self.persist(&request).await;
                self.publish_completed(&request).await;
                ProcessOutcome::Cached
            }
            None => match self.pipeline.execute(&mut request).await {
                Ok(response) => {
                    request.complete(response, clock.now());
                    self.persist(&request).await;
                    self.publish_completed(&request).await;
                    ProcessOutcome::Completed
                }
                Err(GatewayError::Execution(e)) if e.is_retryable() => {
                    let delay = exponential_delay(request.retry_count, self.settings.backoff_base, self.settings.backoff_cap);
                    self.reschedule(request, delay, "EXECUTION_FAILED", &e.to_string(), false)
                        .await
                }
                Err(err) if err.is_retryable() => {
                    let now = clock.now();
                    let wait = err.retry_at().map(|at| elapsed(now, at)).unwrap_or_default();
                    let delay = wait.max(self.settings.deferral_floor);
                    self.reschedule(request, delay, err.code(), &err.to_string(), true).await
                }
                Err(err) => self.fail(request, err.code(), &err.to_string()).await,
            },
        };

        let duration = started.elapsed();
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .processing_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        let counter = match outcome {
            ProcessOutcome::Completed => &self.counters.completed,
            ProcessOutcome::Cached => &self.counters.cached,
            ProcessOutcome::Deferred(_) => &self.counters.deferrals,
            ProcessOutcome::Retrying(_) => &self.counters.retries,
            ProcessOutcome::Failed(_) => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let label = match outcome {
            ProcessOutcome::Completed => "completed",
            ProcessOutcome::Cached => "cached",
            ProcessOutcome::Deferred(_) => "deferred",
            ProcessOutcome::Retrying(_) => "retrying",
            ProcessOutcome::Failed(_) => "failed",
        };
        metrics::record_request(request_type.as_str(), label, duration);
        outcome
    }

    /// Retry later when retries remain, fail terminally otherwise.
    async fn reschedule(
        &self,
        mut request: DataJudRequest,
        delay: Duration,
        code: &'static str,
        message: &str,
        admission: bool,
    ) -> ProcessOutcome {
        let now = self.pipeline.clock().now();
        let retry_at = match request.schedule_retry(delay, now) {
            Ok(at) => at,
            Err(_) => {
                let code = if admission { code } else { "RETRIES_EXHAUSTED" };
                return self.fail(request, code, message).await;
            }
        };

        let events = self.pipeline.events();
        events
            .publish(DomainEvent::request_failed(request.id, code, message, request.retry_count, true, now))
            .await;
        events
            .publish(DomainEvent::request_retrying(
                request.id,
                request.retry_count,
                request.max_retries,
                retry_at,
                now,
            ))
            .await;
        tracing::info!(
            request_id = %request.id,
            retry_count = request.retry_count,
            retry_at = %retry_at,
            reason = code,
            "Request rescheduled"
        );

        // Persist before the push: once queued, a worker owns the stored record.
        let mut queued = request.clone();
        let _ = queued.requeue();
        self.persist(&queued).await;
        if let Err(e) = self.queues.push(queued) {
            // Lane full: the stored copy must stay retrying for the sweep to find it.
            self.persist(&request).await;
            tracing::warn!(request_id = %request.id, error = %e, "Rescheduled request could not be queued, left for the retry sweep");
        }
        if admission {
            ProcessOutcome::Deferred(retry_at)
        } else {
            ProcessOutcome::Retrying(retry_at)
        }
    }

    async fn fail(&self, mut request: DataJudRequest, code: &'static str, message: &str) -> ProcessOutcome {
        let now = self.pipeline.clock().now();
        request.fail(code, message, now);
        self.persist(&request).await;
        self.pipeline
            .events()
            .publish(DomainEvent::request_failed(request.id, code, message, request.retry_count, false, now))
            .await;
        tracing::warn!(request_id = %request.id, code, error = %message, "Request failed");
        ProcessOutcome::Failed(code)
    }

    async fn publish_completed(&self, request: &DataJudRequest) {
        let (status_code, duration_ms, from_cache) = request
            .response
            .as_ref()
            .map(|r| (r.status_code, r.duration_ms, r.from_cache))
            .unwrap_or((0, 0, false));
        self.pipeline
            .events()
            .publish(DomainEvent::request_completed(
                request.id,
                request.credential_id,
                status_code,
                duration_ms,
                from_cache,
                self.pipeline.clock().now(),
            ))
            .await;
    }

    async fn persist(&self, request: &DataJudRequest) {
        if let Err(e) = self.requests.save(request).await {
            tracing::warn!(request_id = %request.id, error = %e, "Failed to persist request");
        }
    }

    /// Re-enqueue persisted `retrying` requests whose retry time has passed.
    pub async fn retry_failed_requests(&self) -> QueueResult<usize> {
        let now = self.pipeline.clock().now();
        let candidates = self.requests.find_by_status(RequestStatus::Retrying, 100).await?;
        let mut requeued = 0;
        for request in candidates {
            if !request.is_eligible(now) || self.queues.contains(request.id) {
                continue;
            }
            let id = request.id;
            match self.enqueue(request).await {
                Ok(()) => requeued += 1,
                Err(e) => tracing::warn!(request_id = %id, error = %e, "Retry not re-enqueued"),
            }
        }
        if requeued > 0 {
            tracing::info!(requeued, "Re-enqueued requests due for retry");
        }
        Ok(requeued)
    }

    /// Delete finished requests older than `max_age`.
    pub async fn cleanup_old_requests(&self, max_age: Duration) -> QueueResult<usize> {
        let cutoff = self.pipeline.clock().now() - to_chrono(max_age);
        let removed = self.requests.delete_finished_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, "Old requests cleaned up");
        }
        Ok(removed)
    }

    pub async fn run_maintenance(
        self: Arc<Self>,
        interval: Duration,
        retention: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(interval_secs = interval.as_secs(), "Queue maintenance loop starting");
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.retry_failed_requests().await {
                        tracing::warn!(error = %e, "Retry sweep failed");
                    }
                    if let Err(e) = self.cleanup_old_requests(retention).await {
                        tracing::warn!(error = %e, "Request cleanup failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Queue maintenance loop received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
