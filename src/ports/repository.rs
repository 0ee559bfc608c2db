//! Persistence contracts.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::credentials::PoolSnapshot;
use crate::domain::{DataJudRequest, DomainEvent, EventKind, RequestStatus};
use crate::ratelimit::SlidingWindow;
use crate::resilience::BreakerState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("storage i/o failed: {0}")]
    Io(String),

    #[error("failed to (de)serialize stored state: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Everything needed to rehydrate the in-memory registries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub pools: Vec<PoolSnapshot>,
    #[serde(default)]
    pub breakers: Vec<BreakerState>,
    #[serde(default)]
    pub limiters: Vec<SlidingWindow>,
    pub saved_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RequestRepository: Send + Sync + fmt::Debug {
    /// Insert or replace.
    async fn save(&self, request: &DataJudRequest) -> PersistenceResult<()>;

    async fn find(&self, id: Uuid) -> PersistenceResult<Option<DataJudRequest>>;

    /// Oldest first, at most `limit`.
    async fn find_by_status(&self, status: RequestStatus, limit: usize) -> PersistenceResult<Vec<DataJudRequest>>;

    /// Remove terminal requests completed before `cutoff`.
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> PersistenceResult<usize>;
}

#[async_trait]
pub trait StateRepository: Send + Sync + fmt::Debug {
    async fn save_pool(&self, pool: &PoolSnapshot) -> PersistenceResult<()>;

    async fn delete_pool(&self, tenant_id: Uuid) -> PersistenceResult<()>;

    async fn save_breaker(&self, breaker: &BreakerState) -> PersistenceResult<()>;

    async fn delete_breaker(&self, name: &str) -> PersistenceResult<()>;

    /// Replace the stored limiter windows.
    async fn save_limiters(&self, limiters: &[SlidingWindow]) -> PersistenceResult<()>;

    async fn load(&self) -> PersistenceResult<StateSnapshot>;
}

/// Append-only event log.
#[async_trait]
pub trait EventStore: Send + Sync + fmt::Debug {
    async fn append(&self, event: &DomainEvent) -> PersistenceResult<()>;

    async fn by_aggregate(&self, aggregate_id: &str) -> PersistenceResult<Vec<DomainEvent>>;

    /// Most recent last, at most `limit`.
    async fn by_kind(&self, kind: EventKind, limit: usize) -> PersistenceResult<Vec<DomainEvent>>;

    async fn since(&self, after: DateTime<Utc>, limit: usize) -> PersistenceResult<Vec<DomainEvent>>;
}
