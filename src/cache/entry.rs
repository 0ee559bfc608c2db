use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::to_chrono;
use crate::domain::RequestType;

/// Labels used for per-tenant cleanup and per-type statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTags {
    pub tenant_id: Option<Uuid>,
    pub request_type: Option<RequestType>,
    pub process_number: Option<String>,
    pub court_id: Option<String>,
}

impl CacheTags {
    pub fn for_request(tenant_id: Uuid, request_type: RequestType, process_number: &str, court_id: &str) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            request_type: Some(request_type),
            process_number: Some(process_number.to_string()),
            court_id: Some(court_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub size: u64,
    pub ttl: Duration,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub hits: u64,
    pub tags: CacheTags,
}

impl<V> CacheEntry<V> {
    pub fn new(key: String, value: V, size: u64, ttl: Duration, tags: CacheTags, now: DateTime<Utc>) -> Self {
        Self {
            key,
            value,
            size,
            ttl,
            created_at: now,
            expires_at: now + to_chrono(ttl),
            last_accessed_at: now,
            hits: 0,
            tags,
        }
    }

    /// Expired at and after `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.hits += 1;
        self.last_accessed_at = now;
    }
}

/// What a hit hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedValue<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let e = CacheEntry::new("k".into(), 1u8, 1, Duration::from_secs(10), CacheTags::default(), now);
        assert!(!e.is_expired(now + chrono::Duration::seconds(9)));
        assert!(e.is_expired(now + chrono::Duration::seconds(10)));
    }
}
