//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to DataJud for a court:
//!     → registry.rs (get-or-create the breaker for "datajud:{court}")
//!     → circuit_breaker.rs (admit, or fail fast while open)
//!     → timeouts.rs (every upstream call has a deadline)
//!     → On retryable failure: backoff.rs (delay before the request is requeued)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Breakers are per resource so one failing court does not starve others
//! - Open → Half-Open is evaluated lazily at admission, never by a timer

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod timeouts;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use circuit_breaker::{
    Admission, BreakerConfig, BreakerState, BreakerStats, CircuitBreaker, CircuitState, ExecutionResult, StateTransition,
};
pub use registry::{BreakerRegistry, HealthStatus, HealthSummary};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BreakerError {
    #[error("circuit breaker '{0}' already exists")]
    Duplicate(String),

    #[error("circuit breaker '{0}' not found")]
    NotFound(String),

    #[error("circuit breaker '{name}' is open")]
    Open {
        name: String,
        retry_at: Option<DateTime<Utc>>,
    },

    #[error("circuit breaker '{0}' is inactive")]
    Inactive(String),

    #[error("invalid breaker configuration: {0}")]
    InvalidConfig(String),
}

pub type BreakerResult<T> = Result<T, BreakerError>;

impl BreakerConfig {
    pub fn validate(&self) -> BreakerResult<()> {
        if self.failure_threshold == 0 {
            return Err(BreakerError::InvalidConfig("failure_threshold must be > 0".into()));
        }
        if self.success_threshold == 0 {
            return Err(BreakerError::InvalidConfig("success_threshold must be > 0".into()));
        }
        if self.timeout.is_zero() {
            return Err(BreakerError::InvalidConfig("timeout must be > 0".into()));
        }
        if self.max_half_open_requests < self.success_threshold {
            return Err(BreakerError::InvalidConfig(
                "max_half_open_requests must be >= success_threshold".into(),
            ));
        }
        Ok(())
    }
}
