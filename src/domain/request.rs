//! The unit of work that flows through the orchestrator and the queues.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::clock::to_chrono;
use crate::domain::response::DataJudResponse;
use crate::domain::types::{Priority, RequestStatus, RequestType};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Illegal lifecycle transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("retries exhausted ({retry_count}/{max_retries})")]
    RetriesExhausted { retry_count: u32, max_retries: u32 },

    #[error("request is {0} and cannot be re-queued")]
    NotRetrying(RequestStatus),
}

/// Failure recorded on a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFailure {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataJudRequest {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub process_id: Option<Uuid>,
    pub request_type: RequestType,
    pub priority: Priority,
    pub status: RequestStatus,
    pub process_number: String,
    pub court_id: String,
    pub parameters: BTreeMap<String, serde_json::Value>,

    pub use_cache: bool,
    pub cache_ttl: Duration,
    pub cache_key: String,

    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_after: Option<DateTime<Utc>>,

    pub credential_id: Option<Uuid>,
    pub breaker_key: Option<String>,

    pub requested_at: DateTime<Utc>,
    pub processing_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub response: Option<DataJudResponse>,
    pub failure: Option<RequestFailure>,
}

impl DataJudRequest {
    pub fn new(
        tenant_id: Uuid,
        client_id: Uuid,
        request_type: RequestType,
        priority: Priority,
        process_number: impl Into<String>,
        court_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut request = Self {
            id: Uuid::new_v4(),
            tenant_id,
            client_id,
            process_id: None,
            request_type,
            priority,
            status: RequestStatus::Pending,
            process_number: process_number.into(),
            court_id: court_id.into(),
            parameters: BTreeMap::new(),
            use_cache: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_key: String::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_after: None,
            credential_id: None,
            breaker_key: None,
            requested_at: now,
            processing_at: None,
            completed_at: None,
            response: None,
            failure: None,
        };
        request.cache_key = request.compute_cache_key();
        request
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, serde_json::Value>) -> Self {
        self.parameters = parameters;
        self.cache_key = self.compute_cache_key();
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_process_id(mut self, process_id: Option<Uuid>) -> Self {
        self.process_id = process_id;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// `datajud:{type}:{sha256(canonical json)}`.
    ///
    /// Parameters live in a `BTreeMap`, so the key does not depend on the
    /// order they were supplied in.
    pub fn compute_cache_key(&self) -> String {
        let canonical = serde_json::json!({
            "type": self.request_type.as_str(),
            "process_number": self.process_number.trim(),
            "court_id": self.court_id.trim().to_ascii_lowercase(),
            "parameters": self.parameters,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        format!("datajud:{}:{}", self.request_type, hex::encode(digest))
    }

    /// Circuit breaker guarding the upstream partition for this court.
    pub fn breaker_key_for(court_id: &str) -> String {
        format!("datajud:{}", court_id.trim().to_ascii_lowercase())
    }

    pub fn assign(&mut self, credential_id: Uuid, breaker_key: impl Into<String>) {
        self.credential_id = Some(credential_id);
        self.breaker_key = Some(breaker_key.into());
    }

    pub fn start_processing(&mut self, now: DateTime<Utc>) {
        self.status = RequestStatus::Processing;
        self.processing_at = Some(now);
        self.retry_after = None;
    }

    pub fn complete(&mut self, response: DataJudResponse, now: DateTime<Utc>) {
        self.status = RequestStatus::Completed;
        self.completed_at = Some(now);
        self.failure = None;
        self.response = Some(response);
    }

    /// Served from cache without touching the upstream.
    pub fn mark_cached(&mut self, response: DataJudResponse, now: DateTime<Utc>) {
        self.status = RequestStatus::Cached;
        self.completed_at = Some(now);
        self.response = Some(response);
    }

    pub fn fail(&mut self, code: impl Into<String>, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = RequestStatus::Failed;
        self.completed_at = Some(now);
        self.failure = Some(RequestFailure {
            code: code.into(),
            message: message.into(),
        });
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Move into `retrying` with a not-before instant `now + delay`.
    pub fn schedule_retry(
        &mut self,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, LifecycleError> {
        if !self.can_retry() {
            return Err(LifecycleError::RetriesExhausted {
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }
        self.retry_count += 1;
        self.status = RequestStatus::Retrying;
        let at = now + to_chrono(delay);
        self.retry_after = Some(at);
        Ok(at)
    }

    /// `retrying` → `pending`, keeping the not-before instant.
    pub fn requeue(&mut self) -> Result<(), LifecycleError> {
        match self.status {
            RequestStatus::Retrying | RequestStatus::Pending => {
                self.status = RequestStatus::Pending;
                Ok(())
            }
            other => Err(LifecycleError::NotRetrying(other)),
        }
    }

    /// Whether a deferred request may run at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.retry_after.map_or(true, |at| at <= now)
    }
}
