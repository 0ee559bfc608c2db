//! Administrative operations on pools, breakers, limiters and the cache.
//!
//! Every mutation is written through [`StateRepository`] and published as a
//! domain event. Breaker transitions reach the event log through the
//! transition forwarder, so breaker operations here only persist.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time;
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::clock::SharedClock;
use crate::credentials::{
    Credential, CredentialPool, CredentialView, PoolRegistry, PoolStats, SelectionStrategy,
};
use crate::domain::cnpj;
use crate::domain::{DomainEvent, DomainPolicy, EventKind, ValidationError};
use crate::error::{GatewayError, GatewayResult};
use crate::ports::{EventPublisher, StateRepository};
use crate::ratelimit::{LimiterStats, RateLimiterRegistry, Tier};
use crate::resilience::{BreakerConfig, BreakerRegistry, BreakerStats, CircuitBreaker, HealthSummary};
use crate::service::pipeline::ResponseCache;

/// Credential as submitted by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCredential {
    pub name: String,
    /// CNPJ, with or without punctuation.
    pub external_id: String,
    pub secret: String,
    #[serde(default)]
    pub daily_limit: Option<u32>,
    #[serde(default)]
    pub priority: Option<u8>,
}

#[derive(Debug)]
pub struct ManagementService {
    pools: Arc<PoolRegistry>,
    breakers: Arc<BreakerRegistry>,
    limiters: Arc<RateLimiterRegistry>,
    cache: Arc<ResponseCache>,
    state: Arc<dyn StateRepository>,
    events: EventPublisher,
    policy: Arc<dyn DomainPolicy>,
    clock: SharedClock,
    default_daily_limit: u32,
}

impl ManagementService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pools: Arc<PoolRegistry>,
        breakers: Arc<BreakerRegistry>,
        limiters: Arc<RateLimiterRegistry>,
        cache: Arc<ResponseCache>,
        state: Arc<dyn StateRepository>,
        events: EventPublisher,
        policy: Arc<dyn DomainPolicy>,
        clock: SharedClock,
        default_daily_limit: u32,
    ) -> Self {
        Self {
            pools,
            breakers,
            limiters,
            cache,
            state,
            events,
            policy,
            clock,
            default_daily_limit,
        }
    }

    // Pools

    pub async fn create_pool(
        &self,
        tenant_id: Uuid,
        name: &str,
        strategy: Option<SelectionStrategy>,
    ) -> GatewayResult<PoolStats> {
        let pool = self.pools.create(tenant_id, name, strategy).map_err(GatewayError::Pool)?;
        self.persist_pool(&pool).await?;
        self.events
            .publish(
                DomainEvent::new(EventKind::PoolCreated, pool.id().to_string(), self.clock.now())
                    .with("tenant_id", tenant_id.to_string())
                    .with("name", pool.name())
                    .with("strategy", pool.strategy().as_str()),
            )
            .await;
        Ok(pool.stats())
    }

    pub async fn remove_pool(&self, tenant_id: Uuid) -> GatewayResult<()> {
        self.pools.remove(tenant_id)?;
        self.state.delete_pool(tenant_id).await?;
        tracing::info!(tenant_id = %tenant_id, "Credential pool removed");
        Ok(())
    }

    pub fn pool_stats(&self, tenant_id: Uuid) -> GatewayResult<PoolStats> {
        Ok(self.pools.require(tenant_id)?.stats())
    }

    pub fn list_pools(&self) -> Vec<PoolStats> {
        self.pools.list()
    }

    pub fn credentials(&self, tenant_id: Uuid) -> GatewayResult<Vec<CredentialView>> {
        Ok(self.pools.require(tenant_id)?.credentials())
    }

    pub async fn add_credential(&self, tenant_id: Uuid, new: NewCredential) -> GatewayResult<CredentialView> {
        self.policy.validate_cnpj(&new.external_id)?;
        if new.secret.trim().is_empty() {
            return Err(ValidationError::new("secret", "is required").into());
        }
        if new.daily_limit == Some(0) {
            return Err(ValidationError::new("daily_limit", "must be greater than zero").into());
        }
        let external_id = cnpj::format(&new.external_id).unwrap_or(new.external_id);

        let pool = self.pools.require(tenant_id)?;
        let mut credential = Credential::new(
            tenant_id,
            new.name,
            external_id,
            new.secret,
            new.daily_limit.unwrap_or(self.default_daily_limit),
            self.clock.now(),
            &pool.rollover(),
        );
        if let Some(priority) = new.priority {
            credential = credential.with_priority(priority);
        }
        let view = pool
            .add_credential(credential)
            .map_err(GatewayError::Pool)?
            .lock()
            .view();
        self.persist_pool(&pool).await?;
        self.events
            .publish(
                DomainEvent::new(EventKind::CredentialAdded, pool.id().to_string(), self.clock.now())
                    .with("tenant_id", tenant_id.to_string())
                    .with("credential_id", view.id.to_string())
                    .with("external_id", view.external_id.clone())
                    .with("daily_limit", view.daily_limit),
            )
            .await;
        Ok(view)
    }

    pub async fn remove_credential(&self, tenant_id: Uuid, credential_id: Uuid) -> GatewayResult<CredentialView> {
        let pool = self.pools.require(tenant_id)?;
        let removed = pool.remove_credential(credential_id)?;
        self.persist_pool(&pool).await?;
        self.events
            .publish(
                DomainEvent::new(EventKind::CredentialRemoved, pool.id().to_string(), self.clock.now())
                    .with("tenant_id", tenant_id.to_string())
                    .with("credential_id", credential_id.to_string()),
            )
            .await;
        Ok(removed.view())
    }

    pub async fn set_credential_active(
        &self,
        tenant_id: Uuid,
        credential_id: Uuid,
        active: bool,
    ) -> GatewayResult<CredentialView> {
        let pool = self.pools.require(tenant_id)?;
        let view = {
            let shared = pool.require(credential_id)?;
            let mut credential = shared.lock();
            let now = self.clock.now();
            if active {
                credential.activate(now);
            } else {
                credential.deactivate(now);
            }
            credential.view()
        };
        self.persist_pool(&pool).await?;
        tracing::info!(tenant_id = %tenant_id, credential_id = %credential_id, active, "Credential state changed");
        Ok(view)
    }

    pub async fn set_strategy(&self, tenant_id: Uuid, strategy: SelectionStrategy) -> GatewayResult<PoolStats> {
        let pool = self.pools.require(tenant_id)?;
        let previous = pool.strategy();
        pool.set_strategy(strategy);
        self.persist_pool(&pool).await?;
        self.events
            .publish(
                DomainEvent::new(EventKind::StrategyChanged, pool.id().to_string(), self.clock.now())
                    .with("tenant_id", tenant_id.to_string())
                    .with("from", previous.as_str())
                    .with("to", strategy.as_str()),
            )
            .await;
        Ok(pool.stats())
    }

    /// Zero every credential's usage and its credential-tier window.
    pub async fn reset_usage(&self, tenant_id: Uuid) -> GatewayResult<PoolStats> {
        let pool = self.pools.require(tenant_id)?;
        pool.reset_all_usage();
        let ids: Vec<Uuid> = pool.credentials().iter().map(|c| c.id).collect();
        self.reset_credential_windows(&ids);
        self.persist_pool(&pool).await?;
        self.events
            .publish(
                DomainEvent::new(EventKind::RateLimitReset, pool.id().to_string(), self.clock.now())
                    .with("tenant_id", tenant_id.to_string())
                    .with("credentials", ids.len()),
            )
            .await;
        Ok(pool.stats())
    }

    fn reset_credential_windows(&self, credential_ids: &[Uuid]) {
        for id in credential_ids {
            // A credential that has not made a call yet has no window.
            let _ = self.limiters.reset(Tier::Credential, &id.to_string());
        }
    }

    // Breakers

    pub async fn create_breaker(&self, name: &str, config: Option<BreakerConfig>) -> GatewayResult<BreakerStats> {
        let config = config.unwrap_or_else(|| self.breakers.default_config());
        let breaker = self.breakers.create(name, config)?;
        self.persist_breaker(&breaker).await?;
        Ok(breaker.stats())
    }

    pub async fn remove_breaker(&self, name: &str) -> GatewayResult<()> {
        self.breakers.remove(name)?;
        self.state.delete_breaker(name).await?;
        Ok(())
    }

    pub fn breaker_stats(&self, name: &str) -> GatewayResult<BreakerStats> {
        Ok(self.breakers.require(name)?.stats())
    }

    pub fn list_breakers(&self) -> Vec<BreakerStats> {
        self.breakers.stats()
    }

    pub fn health_summary(&self) -> HealthSummary {
        self.breakers.health_summary()
    }

    pub async fn reset_breaker(&self, name: &str) -> GatewayResult<BreakerStats> {
        self.breakers.reset(name)?;
        self.breaker_changed(name).await
    }

    pub async fn force_open(&self, name: &str) -> GatewayResult<BreakerStats> {
        self.breakers.force_open(name)?;
        self.breaker_changed(name).await
    }

    pub async fn force_closed(&self, name: &str) -> GatewayResult<BreakerStats> {
        self.breakers.force_closed(name)?;
        self.breaker_changed(name).await
    }

    pub async fn update_breaker_config(&self, name: &str, config: BreakerConfig) -> GatewayResult<BreakerStats> {
        self.breakers.update_config(name, config)?;
        self.breaker_changed(name).await
    }

    async fn breaker_changed(&self, name: &str) -> GatewayResult<BreakerStats> {
        let breaker = self.breakers.require(name)?;
        self.persist_breaker(&breaker).await?;
        Ok(breaker.stats())
    }

    // Rate limits and cache

    pub async fn reset_rate_limit(&self, tier: Tier, key: &str) -> GatewayResult<()> {
        self.limiters.reset(tier, key)?;
        self.state.save_limiters(&self.limiters.snapshots()).await?;
        self.events
            .publish(
                DomainEvent::new(EventKind::RateLimitReset, format!("{}:{}", tier, key), self.clock.now())
                    .with("tier", tier.as_str())
                    .with("key", key),
            )
            .await;
        Ok(())
    }

    pub fn rate_limit_stats(&self) -> Vec<LimiterStats> {
        self.limiters.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn clear_tenant_cache(&self, tenant_id: Uuid) -> usize {
        self.cache.cleanup_tenant(tenant_id)
    }

    // Persistence

    async fn persist_pool(&self, pool: &CredentialPool) -> GatewayResult<()> {
        self.state.save_pool(&pool.snapshot()).await?;
        Ok(())
    }

    async fn persist_breaker(&self, breaker: &CircuitBreaker) -> GatewayResult<()> {
        self.state.save_breaker(&breaker.snapshot()).await?;
        Ok(())
    }

    /// Write every pool, breaker and limiter window.
    pub async fn persist_all(&self) -> GatewayResult<()> {
        for snapshot in self.pools.snapshots() {
            self.state.save_pool(&snapshot).await?;
        }
        for snapshot in self.breakers.snapshots() {
            self.state.save_breaker(&snapshot).await?;
        }
        self.state.save_limiters(&self.limiters.snapshots()).await?;
        Ok(())
    }

    /// Periodically write all state; writes once more on shutdown.
    pub async fn run_snapshots(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = interval.as_secs(), "State snapshot loop starting");
        let mut ticker = time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.persist_all().await {
                        tracing::warn!(error = %e, "State snapshot failed");
                    }
                }
                _ = shutdown.recv() => {
                    if let Err(e) = self.persist_all().await {
                        tracing::warn!(error = %e, "Final state snapshot failed");
                    }
                    tracing::info!("State snapshot loop received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Rehydrate the registries from the state repository.
    pub async fn restore_all(&self) -> GatewayResult<()> {
        let snapshot = self.state.load().await?;
        let (pools, breakers, limiters) = (snapshot.pools.len(), snapshot.breakers.len(), snapshot.limiters.len());
        self.pools.restore(snapshot.pools);
        self.breakers.restore(snapshot.breakers);
        self.limiters.restore(snapshot.limiters);
        tracing::info!(pools, breakers, limiters, "State restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, CacheConfig};
    use crate::clock::ManualClock;
    use crate::credentials::QuotaRollover;
    use crate::domain::DefaultPolicy;
    use crate::ports::{EventStore, MemoryStore};
    use crate::ratelimit::{LimitSpec, TierDefaults};

    struct Harness {
        store: Arc<MemoryStore>,
        limiters: Arc<RateLimiterRegistry>,
        service: ManagementService,
    }

    fn harness() -> Harness {
        let clock: SharedClock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::new());
        let limiters = Arc::new(RateLimiterRegistry::new(TierDefaults::default(), Arc::clone(&clock)));
        let service = ManagementService::new(
            Arc::new(PoolRegistry::new(SelectionStrategy::LeastUsed, QuotaRollover::default(), Arc::clone(&clock))),
            Arc::new(BreakerRegistry::new(BreakerConfig::default(), Arc::clone(&clock))),
            Arc::clone(&limiters),
            Arc::new(Cache::new(CacheConfig::default(), Arc::clone(&clock))),
            store.clone(),
            EventPublisher::new(store.clone() as Arc<dyn EventStore>),
            Arc::new(DefaultPolicy),
            clock,
            10_000,
        );
        Harness { store, limiters, service }
    }

    fn new_credential(external_id: &str) -> NewCredential {
        NewCredential {
            name: "primary".into(),
            external_id: external_id.into(),
            secret: "api-key".into(),
            daily_limit: None,
            priority: None,
        }
    }

    #[tokio::test]
    async fn add_credential_formats_cnpj_and_persists() {
        let h = harness();
        let tenant = Uuid::new_v4();
        h.service.create_pool(tenant, "main", None).await.unwrap();

        let view = h.service.add_credential(tenant, new_credential("11222333000181")).await.unwrap();
        assert_eq!(view.external_id, "11.222.333/0001-81");
        assert_eq!(view.daily_limit, 10_000);

        let state = h.store.load().await.unwrap();
        assert_eq!(state.pools.len(), 1);
        let kinds: Vec<EventKind> = h.store.events().iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EventKind::PoolCreated));
        assert!(kinds.contains(&EventKind::CredentialAdded));
    }

    #[tokio::test]
    async fn invalid_cnpj_is_rejected() {
        let h = harness();
        let tenant = Uuid::new_v4();
        h.service.create_pool(tenant, "main", None).await.unwrap();

        let err = h
            .service
            .add_credential(tenant, new_credential("11.222.333/0001-82"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert!(h.service.credentials(tenant).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_pool_maps_to_no_provider() {
        let h = harness();
        let err = h
            .service
            .add_credential(Uuid::new_v4(), new_credential("11222333000181"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_PROVIDER");
    }

    #[tokio::test]
    async fn reset_usage_clears_credential_windows() {
        let h = harness();
        let tenant = Uuid::new_v4();
        h.service.create_pool(tenant, "main", None).await.unwrap();
        let view = h.service.add_credential(tenant, new_credential("11222333000181")).await.unwrap();

        let key = view.id.to_string();
        h.limiters
            .reserve(&[LimitSpec::new(Tier::Credential, key.clone())])
            .unwrap()
            .commit();
        assert_eq!(h.limiters.status(Tier::Credential, &key).used, 1);

        h.service.reset_usage(tenant).await.unwrap();
        assert_eq!(h.limiters.status(Tier::Credential, &key).used, 0);
    }

    #[tokio::test]
    async fn forced_breaker_state_is_persisted() {
        let h = harness();
        h.service.create_breaker("datajud:tjsp", None).await.unwrap();
        let stats = h.service.force_open("datajud:tjsp").await.unwrap();
        assert_eq!(stats.state, crate::resilience::CircuitState::Open);

        let state = h.store.load().await.unwrap();
        assert_eq!(state.breakers.len(), 1);
        assert_eq!(h.service.breaker_stats("missing").unwrap_err().code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn strategy_change_publishes_event() {
        let h = harness();
        let tenant = Uuid::new_v4();
        h.service.create_pool(tenant, "main", None).await.unwrap();
        let stats = h.service.set_strategy(tenant, SelectionStrategy::RoundRobin).await.unwrap();
        assert_eq!(stats.strategy, SelectionStrategy::RoundRobin);
        assert!(h.store.events().iter().any(|e| e.kind == EventKind::StrategyChanged));
    }
}
