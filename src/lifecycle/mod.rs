//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build stores and registries → Restore state
//!     → Create default breakers → Start workers and maintenance loops
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop listeners → Workers finish in-flight item
//!     → Loops exit → Final state snapshot
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Every background loop subscribes to the same shutdown broadcast

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Gateway, GatewayBuilder};
