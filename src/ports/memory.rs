//! In-process persistence. Used by tests and single-node deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::credentials::PoolSnapshot;
use crate::domain::{DataJudRequest, DomainEvent, EventKind, RequestStatus};
use crate::ports::repository::{
    EventStore, PersistenceResult, RequestRepository, StateRepository, StateSnapshot,
};
use crate::ratelimit::SlidingWindow;
use crate::resilience::BreakerState;

#[derive(Debug, Default)]
pub struct MemoryStore {
    requests: DashMap<Uuid, DataJudRequest>,
    pools: DashMap<Uuid, PoolSnapshot>,
    breakers: DashMap<String, BreakerState>,
    limiters: RwLock<Vec<SlidingWindow>>,
    events: RwLock<Vec<DomainEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    /// All events in append order.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.read().clone()
    }
}

#[async_trait]
impl RequestRepository for MemoryStore {
    async fn save(&self, request: &DataJudRequest) -> PersistenceResult<()> {
        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> PersistenceResult<Option<DataJudRequest>> {
        Ok(self.requests.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_status(&self, status: RequestStatus, limit: usize) -> PersistenceResult<Vec<DataJudRequest>> {
        let mut found: Vec<DataJudRequest> = self
            .requests
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.value().clone())
            .collect();
        found.sort_by_key(|r| r.requested_at);
        found.truncate(limit);
        Ok(found)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> PersistenceResult<usize> {
        let before = self.requests.len();
        self.requests.retain(|_, r| {
            !(r.status.is_terminal() && r.completed_at.is_some_and(|at| at < cutoff))
        });
        Ok(before.saturating_sub(self.requests.len()))
    }
}

#[async_trait]
impl StateRepository for MemoryStore {
    async fn save_pool(&self, pool: &PoolSnapshot) -> PersistenceResult<()> {
        self.pools.insert(pool.tenant_id, pool.clone());
        Ok(())
    }

    async fn delete_pool(&self, tenant_id: Uuid) -> PersistenceResult<()> {
        self.pools.remove(&tenant_id);
        Ok(())
    }

    async fn save_breaker(&self, breaker: &BreakerState) -> PersistenceResult<()> {
        self.breakers.insert(breaker.name.clone(), breaker.clone());
        Ok(())
    }

    async fn delete_breaker(&self, name: &str) -> PersistenceResult<()> {
        self.breakers.remove(name);
        Ok(())
    }

    async fn save_limiters(&self, limiters: &[SlidingWindow]) -> PersistenceResult<()> {
        *self.limiters.write() = limiters.to_vec();
        Ok(())
    }

    async fn load(&self) -> PersistenceResult<StateSnapshot> {
        Ok(StateSnapshot {
            pools: self.pools.iter().map(|p| p.value().clone()).collect(),
            breakers: self.breakers.iter().map(|b| b.value().clone()).collect(),
            limiters: self.limiters.read().clone(),
            saved_at: None,
        })
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append(&self, event: &DomainEvent) -> PersistenceResult<()> {
        self.events.write().push(event.clone());
        Ok(())
    }

    async fn by_aggregate(&self, aggregate_id: &str) -> PersistenceResult<Vec<DomainEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    async fn by_kind(&self, kind: EventKind, limit: usize) -> PersistenceResult<Vec<DomainEvent>> {
        let events = self.events.read();
        let matching: Vec<&DomainEvent> = events.iter().filter(|e| e.kind == kind).collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }

    async fn since(&self, after: DateTime<Utc>, limit: usize) -> PersistenceResult<Vec<DomainEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.occurred_at > after)
            .take(limit)
            .cloned()
            .collect())
    }
}
