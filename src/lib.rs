//! DataJud access gateway.
//!
//! Fronts the CNJ DataJud public API for many tenants. Each request passes
//! the response cache, a per-court circuit breaker, the tenant's credential
//! pool and the credential/tenant/global rate limits before the upstream
//! call; a priority queue runs the same pipeline in the background.

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod ratelimit;
pub mod resilience;
pub mod service;

pub use config::GatewayConfig;
pub use error::{Disposition, GatewayError, GatewayResult};
pub use lifecycle::{Gateway, GatewayBuilder, Shutdown};
