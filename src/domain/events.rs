//! Domain events emitted for every state-changing outcome.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "datajud.request.started")]
    RequestStarted,
    #[serde(rename = "datajud.request.completed")]
    RequestCompleted,
    #[serde(rename = "datajud.request.failed")]
    RequestFailed,
    #[serde(rename = "datajud.request.retrying")]
    RequestRetrying,
    #[serde(rename = "datajud.cache.hit")]
    CacheHit,
    #[serde(rename = "datajud.cache.miss")]
    CacheMiss,
    #[serde(rename = "datajud.cache.stored")]
    CacheStored,
    #[serde(rename = "datajud.rate_limit.exceeded")]
    RateLimitExceeded,
    #[serde(rename = "datajud.rate_limit.reset")]
    RateLimitReset,
    #[serde(rename = "datajud.circuit_breaker.opened")]
    BreakerOpened,
    #[serde(rename = "datajud.circuit_breaker.closed")]
    BreakerClosed,
    #[serde(rename = "datajud.circuit_breaker.half_opened")]
    BreakerHalfOpened,
    #[serde(rename = "datajud.pool.created")]
    PoolCreated,
    #[serde(rename = "datajud.pool.provider_added")]
    CredentialAdded,
    #[serde(rename = "datajud.pool.provider_removed")]
    CredentialRemoved,
    #[serde(rename = "datajud.pool.strategy_changed")]
    StrategyChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RequestStarted => "datajud.request.started",
            EventKind::RequestCompleted => "datajud.request.completed",
            EventKind::RequestFailed => "datajud.request.failed",
            EventKind::RequestRetrying => "datajud.request.retrying",
            EventKind::CacheHit => "datajud.cache.hit",
            EventKind::CacheMiss => "datajud.cache.miss",
            EventKind::CacheStored => "datajud.cache.stored",
            EventKind::RateLimitExceeded => "datajud.rate_limit.exceeded",
            EventKind::RateLimitReset => "datajud.rate_limit.reset",
            EventKind::BreakerOpened => "datajud.circuit_breaker.opened",
            EventKind::BreakerClosed => "datajud.circuit_breaker.closed",
            EventKind::BreakerHalfOpened => "datajud.circuit_breaker.half_opened",
            EventKind::PoolCreated => "datajud.pool.created",
            EventKind::CredentialAdded => "datajud.pool.provider_added",
            EventKind::CredentialRemoved => "datajud.pool.provider_removed",
            EventKind::StrategyChanged => "datajud.pool.strategy_changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event envelope. `aggregate_id` is the request, pool, breaker or limiter
/// the event belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub aggregate_id: String,
    pub occurred_at: DateTime<Utc>,
    pub version: u32,
    pub metadata: Map<String, Value>,
}

impl DomainEvent {
    pub fn new(kind: EventKind, aggregate_id: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            aggregate_id: aggregate_id.into(),
            occurred_at,
            version: 1,
            metadata: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Attach every field of a JSON object.
    pub fn with_fields(mut self, fields: Value) -> Self {
        if let Value::Object(map) = fields {
            self.metadata.extend(map);
        }
        self
    }

    pub fn request_started(request_id: Uuid, credential_id: Uuid, at: DateTime<Utc>) -> Self {
        Self::new(EventKind::RequestStarted, request_id.to_string(), at)
            .with("credential_id", credential_id.to_string())
    }

    pub fn request_completed(
        request_id: Uuid,
        credential_id: Option<Uuid>,
        status_code: u16,
        duration_ms: u64,
        from_cache: bool,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(EventKind::RequestCompleted, request_id.to_string(), at).with_fields(json!({
            "credential_id": credential_id.map(|id| id.to_string()),
            "status_code": status_code,
            "duration_ms": duration_ms,
            "from_cache": from_cache,
        }))
    }

    pub fn request_failed(
        request_id: Uuid,
        code: &str,
        message: &str,
        retry_count: u32,
        will_retry: bool,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(EventKind::RequestFailed, request_id.to_string(), at).with_fields(json!({
            "error_code": code,
            "error_message": message,
            "retry_count": retry_count,
            "will_retry": will_retry,
        }))
    }

    pub fn request_retrying(
        request_id: Uuid,
        retry_count: u32,
        max_retries: u32,
        retry_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(EventKind::RequestRetrying, request_id.to_string(), at).with_fields(json!({
            "retry_count": retry_count,
            "max_retries": max_retries,
            "retry_at": retry_at,
        }))
    }
}
