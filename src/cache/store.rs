//! TTL store with capacity enforcement.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time;
use uuid::Uuid;

use crate::cache::{CacheConfig, CacheEntry, CacheError, CacheResult, CacheTags, CachedValue};
use crate::clock::SharedClock;
use crate::observability::metrics;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeStats {
    pub entries: usize,
    pub size_bytes: u64,
    pub hits: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: u64,
    pub max_entries: usize,
    pub max_size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub by_type: BTreeMap<String, TypeStats>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

#[derive(Debug)]
pub struct Cache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    size_bytes: AtomicU64,
    counters: Counters,
    /// Serializes writes that may need to evict.
    capacity_lock: Mutex<()>,
    config: RwLock<CacheConfig>,
    clock: SharedClock,
}

impl<V> Cache<V>
where
    V: Clone + Serialize + Send + Sync,
{
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            size_bytes: AtomicU64::new(0),
            counters: Counters::default(),
            capacity_lock: Mutex::new(()),
            config: RwLock::new(config),
            clock,
        }
    }

    pub fn config(&self) -> CacheConfig {
        *self.config.read()
    }

    pub fn update_config(&self, config: CacheConfig) {
        *self.config.write() = config;
    }

    /// Remove `key` if it satisfies `pred`, keeping the byte count in step.
    fn remove_where(&self, key: &str, pred: impl FnOnce(&CacheEntry<V>) -> bool) -> bool {
        match self.entries.remove_if(key, |_, e| pred(e)) {
            Some((_, entry)) => {
                self.size_bytes.fetch_sub(entry.size, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedValue<V>> {
        let now = self.clock.now();
        let expired = match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.touch(now);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(true);
                return Some(CachedValue {
                    value: entry.value.clone(),
                    created_at: entry.created_at,
                    expires_at: entry.expires_at,
                    hits: entry.hits,
                });
            }
            Some(_) => true,
            None => false,
        };

        // the map guard is released above; removing under it would deadlock
        if expired && self.remove_where(key, |e| e.is_expired(now)) {
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "Cache entry expired on read");
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(false);
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Store `value` for `ttl` (or the default TTL).
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>, tags: CacheTags) -> CacheResult<()> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        let size = serde_json::to_vec(&value)
            .map(|b| b.len() as u64)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let config = self.config();
        if size > config.max_size_bytes {
            return Err(CacheError::TooLarge {
                size,
                max: config.max_size_bytes,
            });
        }
        let ttl = ttl.unwrap_or(config.default_ttl);
        let now = self.clock.now();

        let _guard = self.capacity_lock.lock();
        let fits = |cache: &Self| {
            let replaced = cache.entries.get(key).map(|e| e.size);
            let count = cache.entries.len() + usize::from(replaced.is_none());
            let bytes = cache
                .size_bytes
                .load(Ordering::Relaxed)
                .saturating_sub(replaced.unwrap_or(0))
                .saturating_add(size);
            count <= config.max_entries && bytes <= config.max_size_bytes
        };

        if !fits(self) {
            self.cleanup_expired();
        }
        if !fits(self) {
            self.evict_until(|c| fits(c), key, &config);
        }

        let entry = CacheEntry::new(key.to_string(), value, size, ttl, tags, now);
        if let Some(old) = self.entries.insert(key.to_string(), entry) {
            self.size_bytes.fetch_sub(old.size, Ordering::Relaxed);
        }
        self.size_bytes.fetch_add(size, Ordering::Relaxed);
        metrics::record_cache_size(self.entries.len(), self.size_bytes.load(Ordering::Relaxed));
        tracing::debug!(key = %key, size, ttl_secs = ttl.as_secs(), "Cache entry stored");
        Ok(())
    }

    /// Evict by policy until `fits` holds. Never evicts `keep`.
    fn evict_until(&self, fits: impl Fn(&Self) -> bool, keep: &str, config: &CacheConfig) {
        let policy = config.eviction_policy;
        let mut ranked: Vec<(u64, chrono::DateTime<chrono::Utc>, String)> = self
            .entries
            .iter()
            .filter(|e| e.key() != keep)
            .map(|e| {
                let (a, b) = policy.rank(e.value());
                (a, b, e.key().clone())
            })
            .collect();
        ranked.sort();

        let mut evicted = 0;
        for (_, _, key) in ranked {
            if fits(self) {
                break;
            }
            if self.remove_where(&key, |_| true) {
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            metrics::record_cache_eviction(policy.as_str(), evicted);
            tracing::info!(evicted, policy = %policy, "Cache over capacity, evicted entries");
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.remove_where(key, |_| true)
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        let removed = expired
            .iter()
            .filter(|key| self.remove_where(key, |e| e.is_expired(now)))
            .count();
        if removed > 0 {
            self.counters.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            metrics::record_cache_eviction("expired", removed);
            tracing::debug!(removed, "Expired cache entries removed");
        }
        removed
    }

    /// Drop every entry tagged with `tenant_id`.
    pub fn cleanup_tenant(&self, tenant_id: Uuid) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.tags.tenant_id == Some(tenant_id))
            .map(|e| e.key().clone())
            .collect();
        let removed = keys.iter().filter(|k| self.delete(k)).count();
        tracing::info!(tenant_id = %tenant_id, removed, "Tenant cache entries removed");
        removed
    }

    pub fn clear(&self) {
        let _guard = self.capacity_lock.lock();
        self.entries.clear();
        self.size_bytes.store(0, Ordering::Relaxed);
        metrics::record_cache_size(0, 0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        let config = self.config();
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let mut by_type: BTreeMap<String, TypeStats> = BTreeMap::new();
        for e in self.entries.iter() {
            let label = e.tags.request_type.map_or("untagged", |t| t.as_str());
            let s = by_type.entry(label.to_string()).or_default();
            s.entries += 1;
            s.size_bytes += e.size;
            s.hits += e.hits;
        }
        CacheStats {
            entries: self.entries.len(),
            size_bytes: self.size_bytes(),
            max_entries: config.max_entries,
            max_size_bytes: config.max_size_bytes,
            hits,
            misses,
            hit_ratio: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            by_type,
        }
    }

    pub fn reset_stats(&self) {
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.evictions.store(0, Ordering::Relaxed);
        self.counters.expirations.store(0, Ordering::Relaxed);
    }

    /// Periodic expiry sweep.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>)
    where
        V: 'static,
    {
        tracing::info!(interval_secs = interval.as_secs(), "Cache sweeper starting");
        let mut ticker = time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cleanup_expired();
                    metrics::record_cache_size(self.len(), self.size_bytes());
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicy;
    use crate::clock::ManualClock;
    use crate::domain::RequestType;

    fn cache(max_entries: usize, max_size_bytes: u64, policy: EvictionPolicy) -> (Cache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = CacheConfig {
            default_ttl: Duration::from_secs(3600),
            max_size_bytes,
            max_entries,
            eviction_policy: policy,
        };
        (Cache::new(config, clock.clone()), clock)
    }

    #[test]
    fn entry_expires_without_sweep() {
        let (c, clock) = cache(10, 1 << 20, EvictionPolicy::Lru);
        c.set("k", "v".into(), Some(Duration::from_secs(60)), CacheTags::default()).unwrap();
        clock.advance(Duration::from_secs(59));
        assert_eq!(c.get("k").unwrap().value, "v");
        clock.advance(Duration::from_secs(1));
        assert!(c.get("k").is_none());
        assert!(c.is_empty());
        assert_eq!(c.size_bytes(), 0);
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses, stats.expirations), (1, 1, 1));
    }

    #[test]
    fn expired_entries_are_purged_before_evicting() {
        let (c, clock) = cache(2, 1 << 20, EvictionPolicy::Lru);
        c.set("short", "a".into(), Some(Duration::from_secs(5)), CacheTags::default()).unwrap();
        c.set("long", "b".into(), None, CacheTags::default()).unwrap();
        clock.advance(Duration::from_secs(10));
        c.set("new", "c".into(), None, CacheTags::default()).unwrap();

        assert!(c.contains("long"));
        assert!(c.contains("new"));
        assert_eq!(c.stats().evictions, 0);
    }

    #[test]
    fn lru_evicts_least_recently_read() {
        let (c, clock) = cache(2, 1 << 20, EvictionPolicy::Lru);
        c.set("a", "1".into(), None, CacheTags::default()).unwrap();
        clock.advance(Duration::from_secs(1));
        c.set("b", "2".into(), None, CacheTags::default()).unwrap();
        clock.advance(Duration::from_secs(1));
        c.get("a");
        clock.advance(Duration::from_secs(1));
        c.set("c", "3".into(), None, CacheTags::default()).unwrap();

        assert!(c.contains("a"));
        assert!(!c.contains("b"));
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn lfu_keeps_popular_entries() {
        let (c, clock) = cache(2, 1 << 20, EvictionPolicy::Lfu);
        c.set("a", "1".into(), None, CacheTags::default()).unwrap();
        c.set("b", "2".into(), None, CacheTags::default()).unwrap();
        for _ in 0..3 {
            c.get("a");
        }
        clock.advance(Duration::from_secs(1));
        c.get("b");
        c.set("c", "3".into(), None, CacheTags::default()).unwrap();
        assert!(c.contains("a"));
        assert!(!c.contains("b"));
    }

    #[test]
    fn byte_limit_is_enforced() {
        // each "xxxx" value serializes to 6 bytes
        let (c, _) = cache(100, 12, EvictionPolicy::Fifo);
        c.set("a", "xxxx".into(), None, CacheTags::default()).unwrap();
        c.set("b", "xxxx".into(), None, CacheTags::default()).unwrap();
        c.set("c", "xxxx".into(), None, CacheTags::default()).unwrap();
        assert_eq!(c.len(), 2);
        assert!(!c.contains("a"));
        assert!(c.size_bytes() <= 12);

        let big = "y".repeat(64);
        assert!(matches!(
            c.set("big", big, None, CacheTags::default()),
            Err(CacheError::TooLarge { .. })
        ));
    }

    #[test]
    fn overwrite_keeps_size_consistent() {
        let (c, _) = cache(10, 1 << 20, EvictionPolicy::Lru);
        c.set("k", "a".into(), None, CacheTags::default()).unwrap();
        c.set("k", "abcdef".into(), None, CacheTags::default()).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.size_bytes(), 8);
        assert!(c.delete("k"));
        assert_eq!(c.size_bytes(), 0);
    }

    #[test]
    fn tenant_cleanup_and_type_stats() {
        let (c, _) = cache(10, 1 << 20, EvictionPolicy::Lru);
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        c.set("p", "1".into(), None, CacheTags::for_request(t1, RequestType::Process, "n", "tjsp")).unwrap();
        c.set("m", "2".into(), None, CacheTags::for_request(t1, RequestType::Movement, "n", "tjsp")).unwrap();
        c.set("o", "3".into(), None, CacheTags::for_request(t2, RequestType::Process, "n", "tjsp")).unwrap();

        let stats = c.stats();
        assert_eq!(stats.by_type["process"].entries, 2);
        assert_eq!(stats.by_type["movement"].entries, 1);

        assert_eq!(c.cleanup_tenant(t1), 2);
        assert_eq!(c.len(), 1);
        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn cleanup_expired_counts() {
        let (c, clock) = cache(10, 1 << 20, EvictionPolicy::Lru);
        c.set("a", "1".into(), Some(Duration::from_secs(1)), CacheTags::default()).unwrap();
        c.set("b", "2".into(), Some(Duration::from_secs(100)), CacheTags::default()).unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(c.cleanup_expired(), 1);
        c.reset_stats();
        assert_eq!(c.stats().expirations, 0);
    }
}
