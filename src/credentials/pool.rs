//! A tenant's credential pool.
//!
//! # Responsibilities
//! - Own the tenant's credentials in insertion order
//! - Apply the lazy daily reset before every quota read or use
//! - Pick the next credential with the configured strategy

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::credentials::{
    Candidate, Credential, CredentialView, PoolError, PoolResult, QuotaRollover, RolloverListener, SelectionStrategy,
    Selector, SharedCredential,
};
use crate::observability::metrics;

/// Persisted form of a pool, credentials included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub strategy: SelectionStrategy,
    pub active: bool,
    pub credentials: Vec<Credential>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub pool_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub strategy: SelectionStrategy,
    pub total_credentials: usize,
    pub active_credentials: usize,
    pub credentials_with_quota: usize,
    pub total_limit: u64,
    pub total_usage: u64,
    pub total_available: u64,
    pub usage_percentage: f64,
    pub next_reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Selection {
    strategy: SelectionStrategy,
    selector: Box<dyn Selector>,
}

#[derive(Debug)]
pub struct CredentialPool {
    id: Uuid,
    tenant_id: Uuid,
    name: RwLock<String>,
    active: RwLock<bool>,
    credentials: RwLock<Vec<SharedCredential>>,
    selection: RwLock<Selection>,
    rollover: QuotaRollover,
    listener: RwLock<Option<Arc<dyn RolloverListener>>>,
    created_at: DateTime<Utc>,
    updated_at: RwLock<DateTime<Utc>>,
    clock: SharedClock,
}

impl CredentialPool {
    pub fn new(
        tenant_id: Uuid,
        name: impl Into<String>,
        strategy: SelectionStrategy,
        rollover: QuotaRollover,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: RwLock::new(name.into()),
            active: RwLock::new(true),
            credentials: RwLock::new(Vec::new()),
            selection: RwLock::new(Selection {
                strategy,
                selector: strategy.selector(),
            }),
            rollover,
            listener: RwLock::new(None),
            created_at: now,
            updated_at: RwLock::new(now),
            clock,
        }
    }

    pub fn from_snapshot(snapshot: PoolSnapshot, rollover: QuotaRollover, clock: SharedClock) -> Self {
        Self {
            id: snapshot.id,
            tenant_id: snapshot.tenant_id,
            name: RwLock::new(snapshot.name),
            active: RwLock::new(snapshot.active),
            credentials: RwLock::new(snapshot.credentials.into_iter().map(Credential::shared).collect()),
            selection: RwLock::new(Selection {
                strategy: snapshot.strategy,
                selector: snapshot.strategy.selector(),
            }),
            rollover,
            listener: RwLock::new(None),
            created_at: snapshot.created_at,
            updated_at: RwLock::new(snapshot.updated_at),
            clock,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn rollover(&self) -> QuotaRollover {
        self.rollover
    }

    pub fn set_rollover_listener(&self, listener: Arc<dyn RolloverListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Lazy daily reset for a locked credential. The listener runs before the
    /// lock is released, so no caller observes the new day half-applied.
    fn refresh_locked(&self, c: &mut Credential, now: DateTime<Utc>) -> bool {
        if !c.refresh(now, &self.rollover) {
            return false;
        }
        tracing::debug!(tenant_id = %self.tenant_id, credential_id = %c.id, "Daily quota rolled over");
        if let Some(listener) = self.listener.read().as_ref() {
            listener.on_rollover(c.id);
        }
        true
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.selection.read().strategy
    }

    pub fn is_active(&self) -> bool {
        *self.active.read()
    }

    pub fn set_active(&self, active: bool) {
        *self.active.write() = active;
        self.touch();
    }

    fn touch(&self) {
        *self.updated_at.write() = self.clock.now();
    }

    /// Swap strategy; the new selector starts with a fresh rotation cursor.
    pub fn set_strategy(&self, strategy: SelectionStrategy) {
        let mut selection = self.selection.write();
        selection.strategy = strategy;
        selection.selector = strategy.selector();
        drop(selection);
        self.touch();
        tracing::info!(tenant_id = %self.tenant_id, strategy = %strategy, "Pool strategy changed");
    }

    pub fn add_credential(&self, credential: Credential) -> PoolResult<SharedCredential> {
        let mut credentials = self.credentials.write();
        for existing in credentials.iter() {
            let c = existing.lock();
            if c.id == credential.id || c.external_id == credential.external_id {
                return Err(PoolError::DuplicateCredential(credential.external_id.clone()));
            }
        }
        tracing::info!(
            tenant_id = %self.tenant_id,
            credential_id = %credential.id,
            daily_limit = credential.daily_limit,
            "Credential added to pool"
        );
        let shared = credential.shared();
        credentials.push(shared.clone());
        drop(credentials);
        self.touch();
        Ok(shared)
    }

    pub fn remove_credential(&self, id: Uuid) -> PoolResult<Credential> {
        let mut credentials = self.credentials.write();
        let pos = credentials
            .iter()
            .position(|c| c.lock().id == id)
            .ok_or(PoolError::CredentialNotFound(id))?;
        let removed = credentials.remove(pos);
        drop(credentials);
        self.touch();
        tracing::info!(tenant_id = %self.tenant_id, credential_id = %id, "Credential removed from pool");
        let credential = removed.lock().clone();
        Ok(credential)
    }

    pub fn get(&self, id: Uuid) -> Option<SharedCredential> {
        self.credentials.read().iter().find(|c| c.lock().id == id).cloned()
    }

    pub fn require(&self, id: Uuid) -> PoolResult<SharedCredential> {
        self.get(id).ok_or(PoolError::CredentialNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.credentials.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.read().is_empty()
    }

    /// Eligible credentials after the lazy reset, in insertion order.
    fn eligible(&self, exclude: &[Uuid], min_remaining: u32) -> (Vec<(Candidate, SharedCredential)>, Option<DateTime<Utc>>) {
        let now = self.clock.now();
        let credentials = self.credentials.read();
        let mut eligible = Vec::with_capacity(credentials.len());
        let mut earliest_reset: Option<DateTime<Utc>> = None;
        for shared in credentials.iter() {
            let mut c = shared.lock();
            self.refresh_locked(&mut c, now);
            if !c.active || exclude.contains(&c.id) {
                continue;
            }
            if c.can_make_request() && c.remaining() >= min_remaining {
                eligible.push((
                    Candidate {
                        id: c.id,
                        usage: c.daily_usage,
                        limit: c.daily_limit,
                        priority: c.priority,
                    },
                    shared.clone(),
                ));
            } else {
                earliest_reset = Some(earliest_reset.map_or(c.reset_at, |at| at.min(c.reset_at)));
            }
        }
        (eligible, earliest_reset)
    }

    fn pick(&self, exclude: &[Uuid], min_remaining: u32) -> PoolResult<SharedCredential> {
        if !self.is_active() {
            return Err(PoolError::NoCredentialAvailable {
                tenant_id: self.tenant_id,
                reset_at: None,
            });
        }
        let (eligible, earliest_reset) = self.eligible(exclude, min_remaining);
        let candidates: Vec<Candidate> = eligible.iter().map(|(c, _)| *c).collect();
        let chosen = self.selection.read().selector.select(&candidates);
        match chosen.and_then(|i| eligible.get(i)) {
            Some((candidate, shared)) => {
                tracing::debug!(tenant_id = %self.tenant_id, credential_id = %candidate.id, "Credential selected");
                Ok(shared.clone())
            }
            None => {
                tracing::warn!(tenant_id = %self.tenant_id, "No credential available");
                Err(PoolError::NoCredentialAvailable {
                    tenant_id: self.tenant_id,
                    reset_at: earliest_reset,
                })
            }
        }
    }

    /// Next credential under the pool's strategy.
    pub fn next_credential(&self) -> PoolResult<SharedCredential> {
        self.pick(&[], 1)
    }

    /// Next credential, skipping `exclude`. Used for the single fallback.
    pub fn next_credential_excluding(&self, exclude: &[Uuid]) -> PoolResult<SharedCredential> {
        self.pick(exclude, 1)
    }

    /// First eligible credential with at least `min` remaining, in pool order.
    pub fn credential_with_quota(&self, min: u32) -> PoolResult<SharedCredential> {
        let (eligible, earliest_reset) = self.eligible(&[], min.max(1));
        eligible
            .into_iter()
            .next()
            .map(|(_, shared)| shared)
            .ok_or(PoolError::NoCredentialAvailable {
                tenant_id: self.tenant_id,
                reset_at: earliest_reset,
            })
    }

    /// Debit quota on a pool member. Returns the remaining quota.
    pub fn use_quota(&self, id: Uuid, amount: u32) -> PoolResult<u32> {
        let shared = self.require(id)?;
        let now = self.clock.now();
        let mut c = shared.lock();
        self.refresh_locked(&mut c, now);
        let remaining = c.use_quota(amount, now)?;
        metrics::record_quota_used(&c.id.to_string(), amount);
        Ok(remaining)
    }

    pub fn reset_all_usage(&self) {
        let now = self.clock.now();
        for shared in self.credentials.read().iter() {
            shared.lock().reset_usage(now, &self.rollover);
        }
        self.touch();
        tracing::info!(tenant_id = %self.tenant_id, "Pool usage reset");
    }

    /// Apply the lazy reset to every credential now. Returns the ids that rolled over.
    pub fn refresh_all(&self) -> Vec<Uuid> {
        let now = self.clock.now();
        self.credentials
            .read()
            .iter()
            .filter_map(|shared| {
                let mut c = shared.lock();
                self.refresh_locked(&mut c, now).then_some(c.id)
            })
            .collect()
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.name.read().trim().is_empty() {
            return Err(PoolError::InvalidPool("pool name is required".into()));
        }
        let active = self.credentials.read().iter().filter(|c| c.lock().active).count();
        if active == 0 {
            return Err(PoolError::InvalidPool("pool has no active credentials".into()));
        }
        Ok(())
    }

    pub fn credentials(&self) -> Vec<CredentialView> {
        let now = self.clock.now();
        self.credentials
            .read()
            .iter()
            .map(|shared| {
                let mut c = shared.lock();
                self.refresh_locked(&mut c, now);
                c.view()
            })
            .collect()
    }

    pub fn stats(&self) -> PoolStats {
        let views = self.credentials();
        let total_limit: u64 = views.iter().filter(|v| v.active).map(|v| u64::from(v.daily_limit)).sum();
        let total_usage: u64 = views.iter().filter(|v| v.active).map(|v| u64::from(v.daily_usage)).sum();
        let usage_percentage = if total_limit == 0 {
            0.0
        } else {
            total_usage as f64 / total_limit as f64 * 100.0
        };
        PoolStats {
            pool_id: self.id,
            tenant_id: self.tenant_id,
            name: self.name(),
            strategy: self.strategy(),
            total_credentials: views.len(),
            active_credentials: views.iter().filter(|v| v.active).count(),
            credentials_with_quota: views.iter().filter(|v| v.active && v.remaining > 0).count(),
            total_limit,
            total_usage,
            total_available: total_limit.saturating_sub(total_usage),
            usage_percentage,
            next_reset_at: views.iter().map(|v| v.reset_at).min(),
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            id: self.id,
            tenant_id: self.tenant_id,
            name: self.name(),
            strategy: self.strategy(),
            active: self.is_active(),
            credentials: self.credentials.read().iter().map(|c| c.lock().clone()).collect(),
            created_at: self.created_at,
            updated_at: *self.updated_at.read(),
        }
    }
}
