//! Domain model: requests, responses, events and policy.
//!
//! # Design Decisions
//! - Lifecycle transitions take `now` explicitly; callers read the clock
//! - Types are plain serde structs so they persist without mapping layers

pub mod cnpj;
pub mod events;
pub mod policy;
pub mod request;
pub mod response;
pub mod types;

pub use events::{DomainEvent, EventKind};
pub use policy::{DefaultPolicy, DomainPolicy, ValidationError};
pub use request::{DataJudRequest, LifecycleError, RequestFailure};
pub use response::{
    BulkItemResult, BulkQuery, BulkQueryItem, BulkQueryResponse, DataJudResponse, DocumentQuery,
    MovementQuery, PartyQuery, ProcessQuery, QueryResponse, SubmitQuery, SubmitReceipt,
};
pub use types::{Priority, RequestStatus, RequestType};
