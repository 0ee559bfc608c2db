//! Credential pools.
//!
//! # Data Flow
//! ```text
//! Request for tenant T
//!     → registry.rs (pool for T)
//!     → pool.rs (lazy daily reset, filter active credentials with quota)
//!     → Apply selection strategy:
//!         - round_robin.rs (rotate through eligible credentials)
//!         - least_used.rs (lowest usage/limit ratio)
//!         - priority.rs (lowest rank, then least used)
//!         - most_available.rs (largest remaining quota)
//!     → Return credential handle or NoCredentialAvailable
//! ```
//!
//! # Design Decisions
//! - Selectors see plain snapshots and never lock credentials themselves
//! - Each credential has its own mutex; the pool lock only guards membership
//! - Selection does not reserve the credential; `use_quota` re-checks the limit

pub mod credential;
pub mod least_used;
pub mod most_available;
pub mod pool;
pub mod priority;
pub mod registry;
pub mod round_robin;
pub mod strategy;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use credential::{Credential, CredentialView, QuotaRollover, SharedCredential};
pub use pool::{CredentialPool, PoolSnapshot, PoolStats};
pub use registry::PoolRegistry;
pub use strategy::{Candidate, SelectionStrategy, Selector};

/// Notified when a credential's daily usage is zeroed, while that credential
/// is still locked. Per-credential state keyed to the quota day (the
/// credential-tier rate window) is cleared here.
pub trait RolloverListener: Send + Sync + std::fmt::Debug {
    fn on_rollover(&self, credential_id: Uuid);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("credential '{0}' already exists in pool")]
    DuplicateCredential(String),

    #[error("credential {0} not found")]
    CredentialNotFound(Uuid),

    #[error("no credential available for tenant {tenant_id}")]
    NoCredentialAvailable {
        tenant_id: Uuid,
        /// Earliest instant at which an exhausted credential regains quota.
        reset_at: Option<DateTime<Utc>>,
    },

    #[error("quota exceeded for credential {credential_id} ({used}/{limit})")]
    QuotaExceeded {
        credential_id: Uuid,
        used: u32,
        limit: u32,
        reset_at: DateTime<Utc>,
    },

    #[error("quota amount must be positive")]
    InvalidAmount,

    #[error("invalid pool: {0}")]
    InvalidPool(String),

    #[error("pool for tenant {0} not found")]
    PoolNotFound(Uuid),

    #[error("pool for tenant {0} already exists")]
    DuplicatePool(Uuid),

    #[error("unknown selection strategy '{0}'")]
    UnknownStrategy(String),
}

pub type PoolResult<T> = Result<T, PoolError>;
