//! Upstream response model and the query DTOs accepted by the orchestrator.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::types::{Priority, RequestStatus, RequestType};

/// Response captured from the upstream, also the value stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataJudResponse {
    pub id: Uuid,
    pub request_id: Uuid,
    pub status_code: u16,
    pub data: serde_json::Value,
    /// Body size in bytes.
    pub size: usize,
    pub duration_ms: u64,
    pub from_cache: bool,
    pub received_at: DateTime<Utc>,
}

/// Result returned by single-item entry points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub data: serde_json::Value,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessQuery {
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    #[serde(default)]
    pub process_id: Option<Uuid>,
    pub process_number: String,
    pub court_id: String,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub urgent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementQuery {
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    #[serde(default)]
    pub process_id: Option<Uuid>,
    pub process_number: String,
    pub court_id: String,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub urgent: bool,
}

impl MovementQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    pub const MAX_PAGE_SIZE: u32 = 100;

    /// Apply paging defaults: page 1, page size 20 when outside `1..=100`.
    pub fn normalize(&mut self) {
        if self.page == 0 {
            self.page = 1;
        }
        if self.page_size == 0 || self.page_size > Self::MAX_PAGE_SIZE {
            self.page_size = Self::DEFAULT_PAGE_SIZE;
        }
    }

    pub fn parameters(&self) -> BTreeMap<String, serde_json::Value> {
        let mut params = BTreeMap::new();
        params.insert("page".to_string(), self.page.into());
        params.insert("page_size".to_string(), self.page_size.into());
        if let Some(from) = self.date_from {
            params.insert("date_from".to_string(), from.to_string().into());
        }
        if let Some(to) = self.date_to {
            params.insert("date_to".to_string(), to.to_string().into());
        }
        params
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyQuery {
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub process_number: String,
    pub court_id: String,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub urgent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentQuery {
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub process_number: String,
    pub court_id: String,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub urgent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkQuery {
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub queries: Vec<BulkQueryItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkQueryItem {
    pub process_number: String,
    pub court_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkQueryResponse {
    pub request_id: Uuid,
    pub results: Vec<BulkItemResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Outcome for one item of a bulk query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub index: usize,
    pub process_number: String,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Asynchronous submission through the queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitQuery {
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub request_type: RequestType,
    pub process_number: String,
    pub court_id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub urgent: bool,
}

/// Acknowledgement for an accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub priority: Priority,
    pub estimated_duration_ms: u64,
}

fn default_true() -> bool {
    true
}
