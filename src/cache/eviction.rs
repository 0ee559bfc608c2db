//! Cache eviction policies.
//!
//! Eviction only runs after expired entries have been purged and the cache
//! is still over its entry or byte limit.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently used: evicts the entry read or written longest ago.
    #[default]
    Lru,
    /// Least frequently used: fewest hits, oldest access breaks ties.
    Lfu,
    /// First in, first out: oldest write regardless of access pattern.
    Fifo,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
        }
    }

    /// Ordering key; the smallest key is evicted first.
    pub(crate) fn rank<V>(&self, entry: &CacheEntry<V>) -> (u64, DateTime<Utc>) {
        match self {
            EvictionPolicy::Lru => (0, entry.last_accessed_at),
            EvictionPolicy::Lfu => (entry.hits, entry.last_accessed_at),
            EvictionPolicy::Fifo => (0, entry.created_at),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            other => Err(format!("unknown eviction policy '{}'", other)),
        }
    }
}
