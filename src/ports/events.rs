//! Domain event publication.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::domain::{DomainEvent, EventKind};
use crate::observability::metrics;
use crate::ports::repository::EventStore;
use crate::resilience::{CircuitState, StateTransition};

#[derive(Debug, Clone)]
pub struct EventPublisher {
    store: Arc<dyn EventStore>,
}

impl EventPublisher {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Append to the event store. A failed append is logged, never returned.
    pub async fn publish(&self, event: DomainEvent) {
        let kind = event.kind;
        match self.store.append(&event).await {
            Ok(()) => {
                tracing::debug!(event = %kind, aggregate_id = %event.aggregate_id, "Domain event published");
                metrics::record_event(kind.as_str(), true);
            }
            Err(e) => {
                tracing::warn!(event = %kind, aggregate_id = %event.aggregate_id, error = %e, "Failed to publish domain event");
                metrics::record_event(kind.as_str(), false);
            }
        }
    }

    pub fn transition_event(t: &StateTransition) -> DomainEvent {
        let kind = match t.to {
            CircuitState::Open => EventKind::BreakerOpened,
            CircuitState::Closed => EventKind::BreakerClosed,
            CircuitState::HalfOpen => EventKind::BreakerHalfOpened,
        };
        DomainEvent::new(kind, t.breaker.clone(), t.at).with_fields(json!({
            "from": t.from,
            "to": t.to,
            "failure_count": t.failure_count,
            "failure_threshold": t.failure_threshold,
        }))
    }

    /// Turn breaker transitions into domain events until shutdown.
    pub async fn run_transition_forwarder(
        self,
        mut transitions: broadcast::Receiver<StateTransition>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!("Breaker event forwarder starting");
        loop {
            tokio::select! {
                received = transitions.recv() => match received {
                    Ok(t) => self.publish(Self::transition_event(&t)).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Breaker event forwarder lagged, transitions dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Breaker event forwarder received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
