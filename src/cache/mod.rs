//! Response cache.
//!
//! # Data Flow
//! ```text
//! get(key)
//!     → store.rs (lookup; expired entries are removed and reported as a miss)
//! set(key, value, ttl, tags)
//!     → over capacity? purge expired entries first
//!     → still over? eviction.rs picks victims (LRU by default)
//!     → insert, account size
//! ```
//!
//! # Design Decisions
//! - Freshness policy per request type lives in the domain policy, not here
//! - Expiry is checked on every read, so correctness never depends on the sweeper
//! - Writes that need eviction serialize on one capacity lock; reads never take it

pub mod entry;
pub mod eviction;
pub mod store;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use entry::{CacheEntry, CacheTags, CachedValue};
pub use eviction::EvictionPolicy;
pub use store::{Cache, CacheStats, TypeStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub max_size_bytes: u64,
    pub max_entries: usize,
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_size_bytes: 1024 * 1024 * 1024,
            max_entries: 100_000,
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache key must not be empty")]
    EmptyKey,

    #[error("entry of {size} bytes exceeds the cache size limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("failed to measure cache value: {0}")]
    Serialization(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
