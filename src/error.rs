//! Caller-facing error taxonomy.
//!
//! Every failure carries a stable machine code and a [`Disposition`] that
//! tells the caller whether to come back later (and when) or give up.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::credentials::PoolError;
use crate::domain::ValidationError;
use crate::ports::{PersistenceError, TransportError};
use crate::queue::QueueError;
use crate::ratelimit::{RateLimitDenial, RateLimitError};
use crate::resilience::BreakerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    /// Recoverable; `retry_at` is the earliest instant worth retrying, when known.
    TryAgainLater { retry_at: Option<DateTime<Utc>> },
    /// Final. Retrying the same request will not help.
    Permanent,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("rate limit exceeded: {0}")]
    RateLimited(RateLimitDenial),

    #[error("daily quota exhausted for tenant {tenant_id}")]
    QuotaExhausted {
        tenant_id: Uuid,
        reset_at: Option<DateTime<Utc>>,
    },

    #[error("circuit breaker '{breaker}' is open")]
    CircuitOpen {
        breaker: String,
        retry_at: Option<DateTime<Utc>>,
    },

    #[error("no credential pool configured for tenant {0}")]
    NoProvider(Uuid),

    #[error("credential {0} not found")]
    CredentialNotFound(Uuid),

    #[error("credential pool error: {0}")]
    Pool(PoolError),

    #[error("upstream call failed: {0}")]
    Execution(TransportError),

    #[error("request {request_id} failed and will be retried at {retry_at}")]
    RetryScheduled {
        request_id: Uuid,
        retry_at: DateTime<Utc>,
        retry_count: u32,
        source: TransportError,
    },

    #[error("request {request_id} failed after {retry_count} retries: {source}")]
    RetriesExhausted {
        request_id: Uuid,
        retry_count: u32,
        source: TransportError,
    },

    #[error("queue error: {0}")]
    Queue(QueueError),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "INVALID_REQUEST",
            GatewayError::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
            GatewayError::QuotaExhausted { .. } => "QUOTA_EXHAUSTED",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_BREAKER_OPEN",
            GatewayError::NoProvider(_) => "NO_PROVIDER",
            GatewayError::CredentialNotFound(_) => "CNPJ_NOT_FOUND",
            GatewayError::Pool(_) => "POOL_ERROR",
            GatewayError::Execution(_) => "EXECUTION_FAILED",
            GatewayError::RetryScheduled { .. } => "RETRY_SCHEDULED",
            GatewayError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            GatewayError::Queue(QueueError::Full { .. }) => "QUEUE_FULL",
            GatewayError::Queue(_) | GatewayError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::Persistence(_) => "PERSISTENCE_ERROR",
            GatewayError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            GatewayError::RateLimited(d) => Disposition::TryAgainLater {
                retry_at: Some(d.reset_at),
            },
            GatewayError::QuotaExhausted { reset_at, .. } => Disposition::TryAgainLater { retry_at: *reset_at },
            GatewayError::CircuitOpen { retry_at, .. } => Disposition::TryAgainLater { retry_at: *retry_at },
            GatewayError::RetryScheduled { retry_at, .. } => Disposition::TryAgainLater {
                retry_at: Some(*retry_at),
            },
            GatewayError::Execution(e) if e.is_retryable() => Disposition::TryAgainLater { retry_at: None },
            GatewayError::Queue(_) | GatewayError::Unavailable(_) => Disposition::TryAgainLater { retry_at: None },
            _ => Disposition::Permanent,
        }
    }

    /// Earliest retry instant, when the failure is recoverable and it is known.
    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        match self.disposition() {
            Disposition::TryAgainLater { retry_at } => retry_at,
            Disposition::Permanent => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.disposition(), Disposition::TryAgainLater { .. })
    }
}

impl From<PoolError> for GatewayError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::NoCredentialAvailable {
                tenant_id,
                reset_at: Some(reset_at),
            } => GatewayError::QuotaExhausted {
                tenant_id,
                reset_at: Some(reset_at),
            },
            PoolError::NoCredentialAvailable { tenant_id, reset_at: None } => GatewayError::NoProvider(tenant_id),
            PoolError::PoolNotFound(tenant_id) => GatewayError::NoProvider(tenant_id),
            PoolError::CredentialNotFound(id) => GatewayError::CredentialNotFound(id),
            other => GatewayError::Pool(other),
        }
    }
}

impl From<BreakerError> for GatewayError {
    fn from(e: BreakerError) -> Self {
        match e {
            BreakerError::Open { name, retry_at } => GatewayError::CircuitOpen { breaker: name, retry_at },
            BreakerError::Inactive(name) => GatewayError::Unavailable(format!("circuit breaker '{}' is inactive", name)),
            BreakerError::NotFound(name) => GatewayError::NotFound(format!("circuit breaker '{}'", name)),
            BreakerError::Duplicate(name) => GatewayError::Configuration(format!("circuit breaker '{}' already exists", name)),
            BreakerError::InvalidConfig(msg) => GatewayError::Configuration(msg),
        }
    }
}

impl From<RateLimitError> for GatewayError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::Denied(d) => GatewayError::RateLimited(d),
            RateLimitError::NotFound(id) => GatewayError::NotFound(format!("rate limiter '{}'", id)),
        }
    }
}

impl From<RateLimitDenial> for GatewayError {
    fn from(d: RateLimitDenial) -> Self {
        GatewayError::RateLimited(d)
    }
}

impl From<QueueError> for GatewayError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Persistence(p) => GatewayError::Persistence(p),
            other => GatewayError::Queue(other),
        }
    }
}
