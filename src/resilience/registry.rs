//! Named circuit breakers, one per upstream resource.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time;

use crate::clock::SharedClock;
use crate::resilience::{
    BreakerConfig, BreakerError, BreakerResult, BreakerState, BreakerStats, CircuitBreaker, CircuitState,
    StateTransition,
};

const TRANSITION_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub total: usize,
    pub healthy: usize,
    pub open: usize,
    pub half_open: usize,
    pub inactive: usize,
    pub health_percentage: f64,
}

#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: RwLock<BreakerConfig>,
    transitions: broadcast::Sender<StateTransition>,
    clock: SharedClock,
}

impl BreakerRegistry {
    pub fn new(default_config: BreakerConfig, clock: SharedClock) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            breakers: DashMap::new(),
            default_config: RwLock::new(default_config),
            transitions,
            clock,
        }
    }

    /// Receive every state transition of every breaker in this registry.
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    pub fn default_config(&self) -> BreakerConfig {
        *self.default_config.read()
    }

    pub fn update_default_config(&self, config: BreakerConfig) -> BreakerResult<()> {
        config.validate()?;
        *self.default_config.write() = config;
        Ok(())
    }

    fn build(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(name, config, self.clock.clone()).with_transitions(self.transitions.clone()))
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let config = self.default_config();
        self.get_or_create_with(name, config)
    }

    /// Atomic get-or-create; `config` only applies when the breaker is new.
    pub fn get_or_create_with(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.value().clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = %name, "Creating circuit breaker");
                self.build(name, config)
            })
            .value()
            .clone()
    }

    pub fn create(&self, name: &str, config: BreakerConfig) -> BreakerResult<Arc<CircuitBreaker>> {
        config.validate()?;
        match self.breakers.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BreakerError::Duplicate(name.to_string())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let cb = self.build(name, config);
                slot.insert(cb.clone());
                tracing::info!(breaker = %name, "Circuit breaker created");
                Ok(cb)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|r| r.value().clone())
    }

    pub fn require(&self, name: &str) -> BreakerResult<Arc<CircuitBreaker>> {
        self.get(name).ok_or_else(|| BreakerError::NotFound(name.to_string()))
    }

    pub fn remove(&self, name: &str) -> BreakerResult<()> {
        self.breakers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BreakerError::NotFound(name.to_string()))
    }

    pub fn reset(&self, name: &str) -> BreakerResult<()> {
        self.require(name)?.reset();
        Ok(())
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn force_open(&self, name: &str) -> BreakerResult<()> {
        self.require(name)?.force_open();
        Ok(())
    }

    pub fn force_closed(&self, name: &str) -> BreakerResult<()> {
        self.require(name)?.force_closed();
        Ok(())
    }

    pub fn set_active(&self, name: &str, active: bool) -> BreakerResult<()> {
        self.require(name)?.set_active(active);
        Ok(())
    }

    pub fn update_config(&self, name: &str, config: BreakerConfig) -> BreakerResult<()> {
        config.validate()?;
        self.require(name)?.update_config(config);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> = self.breakers.iter().map(|e| e.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn healthy(&self) -> Vec<String> {
        self.names_where(|cb| cb.is_healthy())
    }

    pub fn unhealthy(&self) -> Vec<String> {
        self.names_where(|cb| !cb.is_healthy())
    }

    fn names_where(&self, pred: impl Fn(&CircuitBreaker) -> bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Healthy at 80% or more, degraded at 50% or more. An empty registry is healthy.
    pub fn health_summary(&self) -> HealthSummary {
        let stats = self.stats();
        let total = stats.len();
        let healthy = stats.iter().filter(|s| s.healthy).count();
        let open = stats.iter().filter(|s| s.state == CircuitState::Open).count();
        let half_open = stats.iter().filter(|s| s.state == CircuitState::HalfOpen).count();
        let inactive = stats.iter().filter(|s| !s.active).count();
        let health_percentage = if total == 0 {
            100.0
        } else {
            healthy as f64 / total as f64 * 100.0
        };
        let status = if health_percentage >= 80.0 {
            HealthStatus::Healthy
        } else if health_percentage >= 50.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        HealthSummary {
            status,
            total,
            healthy,
            open,
            half_open,
            inactive,
            health_percentage,
        }
    }

    /// Reset breakers that have sat half-open for more than twice their timeout.
    pub fn reset_stuck_half_open(&self) -> usize {
        let mut count = 0;
        for entry in self.breakers.iter() {
            let cb = entry.value();
            let limit = cb.config().timeout.saturating_mul(2);
            if cb.state() == CircuitState::HalfOpen && cb.time_in_state() > limit {
                tracing::warn!(breaker = %cb.name(), "Breaker stuck half-open, resetting");
                cb.reset();
                count += 1;
            }
        }
        count
    }

    pub fn snapshots(&self) -> Vec<BreakerState> {
        self.breakers.iter().map(|e| e.value().snapshot()).collect()
    }

    pub fn restore(&self, states: Vec<BreakerState>) {
        for state in states {
            let name = state.name.clone();
            let cb = CircuitBreaker::from_state(state, self.clock.clone()).with_transitions(self.transitions.clone());
            self.breakers.insert(name, Arc::new(cb));
        }
    }

    /// Periodic health check: logs unhealthy breakers and unsticks half-open ones.
    pub async fn run_health_check(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = interval.as_secs(), "Breaker health check starting");
        let mut ticker = time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reset_stuck_half_open();
                    let summary = self.health_summary();
                    if summary.status != HealthStatus::Healthy {
                        tracing::warn!(
                            status = ?summary.status,
                            open = summary.open,
                            half_open = summary.half_open,
                            total = summary.total,
                            "Upstream breakers not healthy"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Breaker health check received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn registry() -> (BreakerRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = BreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout: Duration::from_secs(10),
            max_half_open_requests: 1,
        };
        (BreakerRegistry::new(config, clock.clone()), clock)
    }

    #[test]
    fn get_or_create_returns_same_instance() {
        let (reg, _) = registry();
        let a = reg.get_or_create("datajud:tjsp");
        let b = reg.get_or_create("datajud:tjsp");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn create_rejects_duplicates_and_bad_config() {
        let (reg, _) = registry();
        reg.create("a", BreakerConfig::default()).unwrap();
        assert_eq!(
            reg.create("a", BreakerConfig::default()).unwrap_err(),
            BreakerError::Duplicate("a".into())
        );
        let bad = BreakerConfig {
            success_threshold: 10,
            max_half_open_requests: 2,
            ..BreakerConfig::default()
        };
        assert!(matches!(reg.create("b", bad), Err(BreakerError::InvalidConfig(_))));
    }

    #[test]
    fn unknown_names_are_not_found() {
        let (reg, _) = registry();
        assert_eq!(reg.reset("nope"), Err(BreakerError::NotFound("nope".into())));
        assert!(reg.force_open("nope").is_err());
        assert!(reg.remove("nope").is_err());
    }

    #[test]
    fn health_summary_thresholds() {
        let (reg, _) = registry();
        assert_eq!(reg.health_summary().status, HealthStatus::Healthy);

        for name in ["a", "b", "c", "d", "e"] {
            reg.get_or_create(name);
        }
        reg.force_open("a").unwrap();
        assert_eq!(reg.health_summary().status, HealthStatus::Healthy);
        reg.force_open("b").unwrap();
        let summary = reg.health_summary();
        assert_eq!(summary.status, HealthStatus::Degraded);
        assert_eq!(summary.open, 2);
        reg.force_open("c").unwrap();
        assert_eq!(reg.health_summary().status, HealthStatus::Unhealthy);
        assert_eq!(reg.unhealthy(), vec!["a", "b", "c"]);
    }

    #[test]
    fn stuck_half_open_is_reset() {
        let (reg, clock) = registry();
        let cb = reg.get_or_create("datajud:trf3");
        cb.force_open();
        clock.advance(Duration::from_secs(10));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        clock.advance(Duration::from_secs(15));
        assert_eq!(reg.reset_stuck_half_open(), 0);
        clock.advance(Duration::from_secs(6));
        assert_eq!(reg.reset_stuck_half_open(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn subscribers_see_transitions_from_any_breaker() {
        let (reg, _) = registry();
        let mut rx = reg.subscribe();
        reg.get_or_create("x").force_open();
        let t = rx.try_recv().unwrap();
        assert_eq!(t.breaker, "x");
        assert_eq!(t.to, CircuitState::Open);
    }

    #[test]
    fn snapshot_and_restore() {
        let (reg, clock) = registry();
        reg.get_or_create("datajud:tjrj").force_open();
        let saved = reg.snapshots();

        let restored = BreakerRegistry::new(BreakerConfig::default(), clock);
        restored.restore(saved);
        assert_eq!(restored.require("datajud:tjrj").unwrap().snapshot().state, CircuitState::Open);
    }
}
