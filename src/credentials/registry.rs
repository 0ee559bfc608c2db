//! Pools keyed by tenant.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::credentials::{
    CredentialPool, PoolError, PoolResult, PoolSnapshot, PoolStats, QuotaRollover, RolloverListener, SelectionStrategy,
};

#[derive(Debug)]
pub struct PoolRegistry {
    pools: DashMap<Uuid, Arc<CredentialPool>>,
    default_strategy: SelectionStrategy,
    rollover: QuotaRollover,
    listener: RwLock<Option<Arc<dyn RolloverListener>>>,
    clock: SharedClock,
}

impl PoolRegistry {
    pub fn new(default_strategy: SelectionStrategy, rollover: QuotaRollover, clock: SharedClock) -> Self {
        Self {
            pools: DashMap::new(),
            default_strategy,
            rollover,
            listener: RwLock::new(None),
            clock,
        }
    }

    pub fn rollover(&self) -> QuotaRollover {
        self.rollover
    }

    pub fn default_strategy(&self) -> SelectionStrategy {
        self.default_strategy
    }

    /// Listener for every pool, present and future.
    pub fn set_rollover_listener(&self, listener: Arc<dyn RolloverListener>) {
        *self.listener.write() = Some(Arc::clone(&listener));
        for pool in self.pools.iter() {
            pool.value().set_rollover_listener(Arc::clone(&listener));
        }
    }

    fn attach(&self, pool: CredentialPool) -> Arc<CredentialPool> {
        if let Some(listener) = self.listener.read().as_ref() {
            pool.set_rollover_listener(Arc::clone(listener));
        }
        Arc::new(pool)
    }

    fn build(&self, tenant_id: Uuid, name: &str, strategy: SelectionStrategy) -> Arc<CredentialPool> {
        self.attach(CredentialPool::new(tenant_id, name, strategy, self.rollover, self.clock.clone()))
    }

    pub fn create(&self, tenant_id: Uuid, name: &str, strategy: Option<SelectionStrategy>) -> PoolResult<Arc<CredentialPool>> {
        if name.trim().is_empty() {
            return Err(PoolError::InvalidPool("pool name is required".into()));
        }
        match self.pools.entry(tenant_id) {
            Entry::Occupied(_) => Err(PoolError::DuplicatePool(tenant_id)),
            Entry::Vacant(slot) => {
                let pool = self.build(tenant_id, name, strategy.unwrap_or(self.default_strategy));
                slot.insert(pool.clone());
                tracing::info!(tenant_id = %tenant_id, pool_id = %pool.id(), "Credential pool created");
                Ok(pool)
            }
        }
    }

    /// Atomic get-or-create with the default strategy.
    pub fn get_or_create(&self, tenant_id: Uuid) -> Arc<CredentialPool> {
        self.pools
            .entry(tenant_id)
            .or_insert_with(|| self.build(tenant_id, &format!("tenant-{}", tenant_id), self.default_strategy))
            .value()
            .clone()
    }

    pub fn get(&self, tenant_id: Uuid) -> Option<Arc<CredentialPool>> {
        self.pools.get(&tenant_id).map(|p| p.value().clone())
    }

    pub fn require(&self, tenant_id: Uuid) -> PoolResult<Arc<CredentialPool>> {
        self.get(tenant_id).ok_or(PoolError::PoolNotFound(tenant_id))
    }

    pub fn remove(&self, tenant_id: Uuid) -> PoolResult<()> {
        self.pools
            .remove(&tenant_id)
            .map(|_| ())
            .ok_or(PoolError::PoolNotFound(tenant_id))
    }

    pub fn list(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self.pools.iter().map(|p| p.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Apply pending daily resets across all pools. Returns rolled-over credential ids.
    pub fn sweep_quotas(&self) -> Vec<Uuid> {
        let pools: Vec<Arc<CredentialPool>> = self.pools.iter().map(|p| p.value().clone()).collect();
        let reset: Vec<Uuid> = pools.iter().flat_map(|p| p.refresh_all()).collect();
        if !reset.is_empty() {
            tracing::info!(count = reset.len(), "Daily credential quotas reset");
        }
        reset
    }

    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.pools.iter().map(|p| p.value().snapshot()).collect()
    }

    pub fn restore(&self, snapshots: Vec<PoolSnapshot>) {
        for snapshot in snapshots {
            let tenant_id = snapshot.tenant_id;
            let pool = CredentialPool::from_snapshot(snapshot, self.rollover, self.clock.clone());
            self.pools.insert(tenant_id, self.attach(pool));
        }
    }

    /// Periodic quota sweep. Credentials nobody selects still roll over on
    /// time, and the rollover listener sees each of them.
    pub async fn run_quota_sweep(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = interval.as_secs(), "Quota sweep starting");
        let mut ticker = time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_quotas();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Quota sweep received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::credentials::Credential;

    fn registry() -> (PoolRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (PoolRegistry::new(SelectionStrategy::LeastUsed, QuotaRollover::utc(), clock.clone()), clock)
    }

    #[test]
    fn one_pool_per_tenant() {
        let (reg, _) = registry();
        let tenant = Uuid::new_v4();
        reg.create(tenant, "main", None).unwrap();
        assert_eq!(reg.create(tenant, "other", None).unwrap_err(), PoolError::DuplicatePool(tenant));
        assert!(Arc::ptr_eq(&reg.get_or_create(tenant), &reg.require(tenant).unwrap()));
        reg.remove(tenant).unwrap();
        assert!(reg.require(tenant).is_err());
    }

    #[test]
    fn sweep_reports_rolled_over_credentials() {
        let (reg, clock) = registry();
        let tenant = Uuid::new_v4();
        let pool = reg.create(tenant, "main", Some(SelectionStrategy::RoundRobin)).unwrap();
        let c = Credential::new(tenant, "a", "a", "s", 5, clock.now(), &QuotaRollover::utc());
        let id = c.id;
        pool.add_credential(c).unwrap();
        pool.use_quota(id, 5).unwrap();

        assert!(reg.sweep_quotas().is_empty());
        clock.advance(Duration::from_secs(86_400));
        assert_eq!(reg.sweep_quotas(), vec![id]);
        assert_eq!(pool.stats().total_usage, 0);
    }

    #[test]
    fn restore_rebuilds_pools() {
        let (reg, clock) = registry();
        let tenant = Uuid::new_v4();
        reg.create(tenant, "main", None).unwrap();
        let other = PoolRegistry::new(SelectionStrategy::RoundRobin, QuotaRollover::utc(), clock);
        other.restore(reg.snapshots());
        assert_eq!(other.require(tenant).unwrap().name(), "main");
    }
}
