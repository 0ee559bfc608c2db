//! Registry of sliding windows keyed by `"{tier}:{key}"`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time;
use uuid::Uuid;

use crate::clock::{elapsed, SharedClock};
use crate::credentials::RolloverListener;
use crate::observability::metrics;
use crate::ratelimit::{
    limiter_id, LimitSpec, RateDecision, RateLimitDenial, RateLimitError, RateLimitResult,
    Reservation, SlidingWindow, Tier, GLOBAL_KEY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimit {
    pub window: Duration,
    pub max_requests: u32,
}

impl TierLimit {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self { window, max_requests }
    }
}

/// Limits applied when a window is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDefaults {
    pub credential: TierLimit,
    pub tenant: TierLimit,
    pub global: TierLimit,
}

impl TierDefaults {
    pub fn for_tier(&self, tier: Tier) -> TierLimit {
        match tier {
            Tier::Credential => self.credential,
            Tier::Tenant => self.tenant,
            Tier::Global => self.global,
        }
    }
}

impl Default for TierDefaults {
    fn default() -> Self {
        Self {
            credential: TierLimit::new(Duration::from_secs(24 * 60 * 60), 10_000),
            tenant: TierLimit::new(Duration::from_secs(60 * 60), 100),
            global: TierLimit::new(Duration::from_secs(60 * 60), 1_000),
        }
    }
}

/// Read-only view of one window for admin endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterStats {
    pub id: String,
    pub tier: Tier,
    pub key: String,
    pub active: bool,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub usage_percentage: f64,
    pub window_secs: u64,
    pub reset_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct RateLimiterRegistry {
    limiters: DashMap<String, Arc<Mutex<SlidingWindow>>>,
    defaults: RwLock<TierDefaults>,
    clock: SharedClock,
}

impl RateLimiterRegistry {
    pub fn new(defaults: TierDefaults, clock: SharedClock) -> Self {
        Self {
            limiters: DashMap::new(),
            defaults: RwLock::new(defaults),
            clock,
        }
    }

    pub fn defaults(&self) -> TierDefaults {
        *self.defaults.read()
    }

    /// Get-or-create as a single map operation.
    pub fn limiter(&self, tier: Tier, key: &str, limit: Option<TierLimit>) -> Arc<Mutex<SlidingWindow>> {
        let id = limiter_id(tier, key);
        if let Some(existing) = self.limiters.get(&id) {
            return existing.value().clone();
        }
        let limit = limit.unwrap_or_else(|| self.defaults.read().for_tier(tier));
        let now = self.clock.now();
        self.limiters
            .entry(id)
            .or_insert_with(|| {
                tracing::debug!(tier = %tier, key = %key, max = limit.max_requests, "Creating rate limiter");
                Arc::new(Mutex::new(SlidingWindow::new(tier, key, limit.window, limit.max_requests, now)))
            })
            .value()
            .clone()
    }

    pub fn get(&self, tier: Tier, key: &str) -> Option<Arc<Mutex<SlidingWindow>>> {
        self.limiters.get(&limiter_id(tier, key)).map(|r| r.value().clone())
    }

    /// Single-tier admission.
    pub fn admit(&self, tier: Tier, key: &str) -> RateDecision {
        let limiter = self.limiter(tier, key, None);
        let decision = limiter.lock().admit(self.clock.now());
        if !decision.allowed {
            tracing::warn!(tier = %tier, key = %key, used = decision.used, limit = decision.limit, "Rate limit exceeded");
            metrics::record_rate_limited(tier.as_str());
        }
        decision
    }

    /// Status without side effects. Unknown keys report a fresh window.
    pub fn status(&self, tier: Tier, key: &str) -> RateDecision {
        let now = self.clock.now();
        match self.get(tier, key) {
            Some(limiter) => limiter.lock().status(now),
            None => {
                let limit = self.defaults.read().for_tier(tier);
                SlidingWindow::new(tier, key, limit.window, limit.max_requests, now).status(now)
            }
        }
    }

    /// Admit against every spec in order, or none of them.
    pub fn reserve(&self, specs: &[LimitSpec]) -> Result<Reservation, RateLimitDenial> {
        let now = self.clock.now();
        let mut reservation = Reservation::new();
        for spec in specs {
            let limiter = self.limiter(spec.tier, &spec.key, spec.limit);
            let decision = limiter.lock().admit(now);
            if !decision.allowed {
                tracing::warn!(
                    tier = %spec.tier,
                    key = %spec.key,
                    used = decision.used,
                    limit = decision.limit,
                    "Rate limit exceeded, releasing earlier tiers"
                );
                metrics::record_rate_limited(spec.tier.as_str());
                // `reservation` drops here and releases what it holds
                return Err(RateLimitDenial::from_decision(spec.tier, &spec.key, &decision));
            }
            reservation.hold(limiter, now, spec.tier, decision);
        }
        Ok(reservation)
    }

    /// Compound credential → tenant → global check, committed when all admit.
    pub fn check_allowance(
        &self,
        credential_key: &str,
        credential_limit: Option<TierLimit>,
        tenant_key: &str,
    ) -> Result<Vec<(Tier, RateDecision)>, RateLimitDenial> {
        let mut credential = LimitSpec::new(Tier::Credential, credential_key);
        if let Some(limit) = credential_limit {
            credential = credential.with_limit(limit);
        }
        let specs = [
            credential,
            LimitSpec::new(Tier::Tenant, tenant_key),
            LimitSpec::new(Tier::Global, GLOBAL_KEY),
        ];
        Ok(self.reserve(&specs)?.commit())
    }

    /// Whether all three tiers would currently admit, without reserving.
    pub fn would_admit(&self, credential_key: &str, tenant_key: &str) -> bool {
        self.status(Tier::Credential, credential_key).allowed
            && self.status(Tier::Tenant, tenant_key).allowed
            && self.status(Tier::Global, GLOBAL_KEY).allowed
    }

    pub fn reset(&self, tier: Tier, key: &str) -> RateLimitResult<()> {
        let limiter = self
            .get(tier, key)
            .ok_or_else(|| RateLimitError::NotFound(limiter_id(tier, key)))?;
        limiter.lock().reset();
        tracing::info!(tier = %tier, key = %key, "Rate limiter reset");
        Ok(())
    }

    /// Clear every window of a tier. Returns how many were reset.
    pub fn reset_tier(&self, tier: Tier) -> usize {
        let mut count = 0;
        for entry in self.limiters.iter() {
            let mut w = entry.value().lock();
            if w.tier == tier {
                w.reset();
                count += 1;
            }
        }
        tracing::info!(tier = %tier, count, "Rate limiter tier reset");
        count
    }

    pub fn update_limit(&self, tier: Tier, key: &str, limit: TierLimit) {
        let limiter = self.limiter(tier, key, Some(limit));
        limiter.lock().set_window(limit.window, limit.max_requests, self.clock.now());
    }

    /// Replace defaults and apply them to live tenant and global windows.
    ///
    /// Credential windows keep their per-credential quota.
    pub fn update_defaults(&self, defaults: TierDefaults) {
        *self.defaults.write() = defaults;
        let now = self.clock.now();
        for entry in self.limiters.iter() {
            let mut w = entry.value().lock();
            if w.tier != Tier::Credential {
                let limit = defaults.for_tier(w.tier);
                w.set_window(limit.window, limit.max_requests, now);
            }
        }
    }

    pub fn set_active(&self, tier: Tier, key: &str, active: bool) -> RateLimitResult<()> {
        let limiter = self
            .get(tier, key)
            .ok_or_else(|| RateLimitError::NotFound(limiter_id(tier, key)))?;
        limiter.lock().active = active;
        Ok(())
    }

    /// Drop windows idle for longer than `max_idle` that are inactive or hold
    /// no admission inside their window. A window still counting admissions
    /// is never dropped, or its count would restart mid-window.
    pub fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let before = self.limiters.len();
        self.limiters.retain(|_, limiter| {
            let w = limiter.lock();
            let idle = elapsed(w.last_activity(), now) > max_idle;
            let drained = !w.active || w.status(now).used == 0;
            !(idle && drained)
        });
        let removed = before.saturating_sub(self.limiters.len());
        if removed > 0 {
            tracing::info!(removed, "Cleaned up idle rate limiters");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    pub fn stats(&self) -> Vec<LimiterStats> {
        let now = self.clock.now();
        let mut stats: Vec<LimiterStats> = self
            .limiters
            .iter()
            .map(|entry| {
                let w = entry.value().lock();
                let status = w.status(now);
                LimiterStats {
                    id: entry.key().clone(),
                    tier: w.tier,
                    key: w.key.clone(),
                    active: w.active,
                    used: status.used,
                    limit: w.max_requests,
                    remaining: w.remaining(now),
                    usage_percentage: w.usage_percentage(now),
                    window_secs: w.window.as_secs(),
                    reset_at: status.reset_at,
                    last_used_at: w.last_used_at,
                }
            })
            .collect();
        stats.sort_by(|a, b| a.id.cmp(&b.id));
        stats
    }

    pub fn snapshots(&self) -> Vec<SlidingWindow> {
        self.limiters.iter().map(|e| e.value().lock().clone()).collect()
    }

    pub fn restore(&self, windows: Vec<SlidingWindow>) {
        for w in windows {
            self.limiters.insert(w.id(), Arc::new(Mutex::new(w)));
        }
    }

    /// Periodic cleanup loop.
    pub async fn run_cleanup(self: Arc<Self>, interval: Duration, max_idle: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = interval.as_secs(), "Rate limiter cleanup starting");
        let mut ticker = time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cleanup_idle(max_idle);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limiter cleanup received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

impl RolloverListener for RateLimiterRegistry {
    /// The credential window covers one quota day; it restarts with the quota.
    fn on_rollover(&self, credential_id: Uuid) {
        if let Some(limiter) = self.get(Tier::Credential, &credential_id.to_string()) {
            limiter.lock().reset();
            tracing::debug!(credential_id = %credential_id, "Credential rate window reset on quota rollover");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn registry(tenant_max: u32, global_max: u32) -> (Arc<RateLimiterRegistry>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let defaults = TierDefaults {
            credential: TierLimit::new(Duration::from_secs(86_400), 100),
            tenant: TierLimit::new(Duration::from_secs(3600), tenant_max),
            global: TierLimit::new(Duration::from_secs(3600), global_max),
        };
        (Arc::new(RateLimiterRegistry::new(defaults, clock.clone())), clock)
    }

    #[test]
    fn burst_beyond_limit_is_denied() {
        let (reg, _) = registry(5, 100);
        let admitted = (0..8).filter(|_| reg.admit(Tier::Tenant, "t").allowed).count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn later_tier_denial_rolls_back_earlier_tiers() {
        let (reg, _) = registry(1, 100);
        assert!(reg.check_allowance("cred-a", None, "tenant-1").is_ok());

        let denial = reg.check_allowance("cred-b", None, "tenant-1").unwrap_err();
        assert_eq!(denial.tier, Tier::Tenant);
        assert!(denial.reset_at > Utc::now() - chrono::Duration::seconds(1));

        // cred-b's credential admission was released, global kept only one
        assert_eq!(reg.status(Tier::Credential, "cred-b").used, 0);
        assert_eq!(reg.status(Tier::Global, GLOBAL_KEY).used, 1);
        assert_eq!(reg.status(Tier::Credential, "cred-a").used, 1);
    }

    #[test]
    fn global_denial_releases_credential_and_tenant() {
        let (reg, _) = registry(10, 1);
        reg.check_allowance("cred-a", None, "tenant-1").unwrap();
        let denial = reg.check_allowance("cred-b", None, "tenant-2").unwrap_err();
        assert_eq!(denial.tier, Tier::Global);
        assert_eq!(reg.status(Tier::Tenant, "tenant-2").used, 0);
        assert_eq!(reg.status(Tier::Credential, "cred-b").used, 0);
    }

    #[test]
    fn uncommitted_reservation_is_released_on_drop() {
        let (reg, _) = registry(10, 10);
        {
            let r = reg
                .reserve(&[LimitSpec::new(Tier::Tenant, "t"), LimitSpec::new(Tier::Global, GLOBAL_KEY)])
                .unwrap();
            assert_eq!(r.decisions().len(), 2);
        }
        assert_eq!(reg.status(Tier::Tenant, "t").used, 0);
        assert_eq!(reg.status(Tier::Global, GLOBAL_KEY).used, 0);
    }

    #[test]
    fn credential_window_uses_explicit_limit() {
        let (reg, _) = registry(100, 100);
        let limit = TierLimit::new(Duration::from_secs(86_400), 2);
        assert!(reg.check_allowance("c", Some(limit), "t").is_ok());
        assert!(reg.check_allowance("c", Some(limit), "t").is_ok());
        let denial = reg.check_allowance("c", Some(limit), "t").unwrap_err();
        assert_eq!(denial.tier, Tier::Credential);
        assert_eq!(denial.limit, 2);
    }

    #[test]
    fn status_on_unknown_key_does_not_register() {
        let (reg, _) = registry(1, 1);
        assert!(reg.status(Tier::Tenant, "nobody").allowed);
        assert!(reg.is_empty());
    }

    #[test]
    fn concurrent_burst_never_exceeds_limit() {
        let (reg, _) = registry(50, 10_000);
        let admitted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                let admitted = admitted.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        if reg.check_allowance("c", None, "t").is_ok() {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(admitted.load(std::sync::atomic::Ordering::SeqCst), 50);
        assert_eq!(reg.status(Tier::Global, GLOBAL_KEY).used, 50);
    }

    #[test]
    fn idle_and_inactive_limiters_are_cleaned_up() {
        let (reg, clock) = registry(10, 10);
        reg.admit(Tier::Tenant, "busy");
        reg.admit(Tier::Tenant, "idle");
        reg.set_active(Tier::Tenant, "busy", false).unwrap();

        clock.advance(Duration::from_secs(2 * 3600));
        reg.admit(Tier::Tenant, "fresh");
        let removed = reg.cleanup_idle(Duration::from_secs(3600));
        assert_eq!(removed, 2);
        assert!(reg.get(Tier::Tenant, "fresh").is_some());
    }

    #[test]
    fn cleanup_keeps_idle_window_that_still_counts_admissions() {
        let (reg, clock) = registry(100, 100);
        let limit = TierLimit::new(Duration::from_secs(86_400), 2);
        reg.check_allowance("c", Some(limit), "t").unwrap();
        reg.check_allowance("c", Some(limit), "t").unwrap();
        assert!(reg.check_allowance("c", Some(limit), "t").is_err());

        clock.advance(Duration::from_secs(2 * 3600));
        reg.cleanup_idle(Duration::from_secs(3600));
        assert!(reg.get(Tier::Credential, "c").is_some());
        // tenant and global windows are an hour long and have drained
        assert!(reg.get(Tier::Tenant, "t").is_none());

        let denial = reg.check_allowance("c", Some(limit), "t").unwrap_err();
        assert_eq!(denial.tier, Tier::Credential);
        assert_eq!(reg.status(Tier::Credential, "c").used, 2);
    }

    #[test]
    fn cleanup_drops_inactive_window_even_with_admissions() {
        let (reg, clock) = registry(100, 100);
        reg.check_allowance("c", None, "t").unwrap();
        reg.set_active(Tier::Credential, "c", false).unwrap();
        clock.advance(Duration::from_secs(2 * 3600));
        reg.cleanup_idle(Duration::from_secs(3600));
        assert!(reg.get(Tier::Credential, "c").is_none());
    }

    #[test]
    fn rollover_resets_only_that_credentials_window() {
        let (reg, _) = registry(100, 100);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let limit = TierLimit::new(Duration::from_secs(86_400), 1);
        reg.check_allowance(&a.to_string(), Some(limit), "t").unwrap();
        reg.check_allowance(&b.to_string(), Some(limit), "t").unwrap();

        reg.on_rollover(a);
        assert_eq!(reg.status(Tier::Credential, &a.to_string()).used, 0);
        assert_eq!(reg.status(Tier::Credential, &b.to_string()).used, 1);
        assert!(reg.check_allowance(&a.to_string(), Some(limit), "t").is_ok());

        // unknown credential is a no-op
        reg.on_rollover(Uuid::new_v4());
        assert_eq!(reg.status(Tier::Tenant, "t").used, 3);
    }

    #[test]
    fn reset_tier_clears_credential_windows_only() {
        let (reg, _) = registry(10, 10);
        reg.check_allowance("c1", None, "t").unwrap();
        reg.check_allowance("c2", None, "t").unwrap();
        assert_eq!(reg.reset_tier(Tier::Credential), 2);
        assert_eq!(reg.status(Tier::Credential, "c1").used, 0);
        assert_eq!(reg.status(Tier::Tenant, "t").used, 2);
    }

    #[test]
    fn reset_unknown_key_is_an_error() {
        let (reg, _) = registry(10, 10);
        assert!(matches!(reg.reset(Tier::Tenant, "x"), Err(RateLimitError::NotFound(_))));
    }

    #[test]
    fn update_defaults_applies_to_tenant_windows() {
        let (reg, _) = registry(1, 10);
        reg.admit(Tier::Tenant, "t");
        assert!(!reg.status(Tier::Tenant, "t").allowed);
        let mut defaults = reg.defaults();
        defaults.tenant.max_requests = 5;
        reg.update_defaults(defaults);
        assert!(reg.status(Tier::Tenant, "t").allowed);
    }
}
