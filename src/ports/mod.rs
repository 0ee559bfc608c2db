//! Boundaries to the outside world.
//!
//! # Data Flow
//! ```text
//! pipeline
//!     → transport.rs (Transport trait; http.rs calls DataJud over HTTP)
//!     → repository.rs (request/state/event persistence traits)
//!         - memory.rs (in-process, DashMap-backed)
//!         - file.rs (state snapshots in a JSON file)
//!     → events.rs (publish domain events to the store and the log)
//! ```
//!
//! # Design Decisions
//! - The core only sees traits; implementations are injected at startup
//! - Event publication never fails a request; failures are logged

pub mod events;
pub mod file;
pub mod http;
pub mod memory;
pub mod repository;
pub mod transport;

pub use events::EventPublisher;
pub use file::JsonFileStateStore;
pub use http::HttpTransport;
pub use memory::MemoryStore;
pub use repository::{EventStore, PersistenceError, PersistenceResult, RequestRepository, StateRepository, StateSnapshot};
pub use transport::{CallCredential, Transport, TransportError, UpstreamCall, UpstreamResponse};
