//! Request services.
//!
//! # Data Flow
//! ```text
//! http router
//!     → orchestrator.rs (validate, build request, sync path)
//!         - bulk.rs (many items, throttled, low priority)
//!     → queue (async path, see crate::queue)
//!     → pipeline.rs (cache → breaker → credential → rate limits → transport)
//!
//! admin router
//!     → management.rs (pools, credentials, breakers, limiters, cache)
//! ```
//!
//! # Design Decisions
//! - The sync and queued paths share one pipeline, so admission and
//!   credential fallback behave the same in both
//! - Denials surface to sync callers immediately; the queue defers them

pub mod bulk;
pub mod management;
pub mod orchestrator;
pub mod pipeline;

pub use management::{ManagementService, NewCredential};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use pipeline::{CacheHit, Pipeline, PipelineSettings, ResponseCache};
