//! Priority queues and the worker pool that drains them.
//!
//! # Data Flow
//! ```text
//! enqueue(request)
//!     → persist (RequestRepository)
//!     → lane for its priority (urgent | high | normal | low)
//!
//! worker loop (N workers):
//!     pop first eligible item, most urgent lane first
//!     → cache → breaker → credential → rate limit → transport
//!     → complete | defer (rate limit, breaker) | retry with backoff | fail
//! ```
//!
//! # Design Decisions
//! - Strict priority across lanes; FIFO among eligible items within a lane
//! - Deferred items keep their place but are skipped until `retry_after`
//! - Workers are cancelled only between items, so shutdown never abandons
//!   an in-flight upstream call

pub mod manager;
pub mod priority;
pub mod worker;

use thiserror::Error;

use crate::domain::Priority;
use crate::ports::PersistenceError;

pub use manager::{ProcessOutcome, QueueManager, QueueSettings, QueueStats};
pub use priority::{LaneCapacities, PriorityQueues};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{priority} queue is full (capacity {capacity})")]
    Full { priority: Priority, capacity: usize },

    #[error("queue manager is shutting down")]
    ShuttingDown,

    #[error("worker {0} not found")]
    WorkerNotFound(usize),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type QueueResult<T> = Result<T, QueueError>;
