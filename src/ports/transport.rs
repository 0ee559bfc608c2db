//! Upstream transport contract.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{DataJudRequest, RequestType};

/// Identity a call is made with.
#[derive(Clone)]
pub struct CallCredential {
    pub id: Uuid,
    /// CNPJ the key belongs to.
    pub external_id: String,
    pub secret: String,
}

impl fmt::Debug for CallCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallCredential")
            .field("id", &self.id)
            .field("external_id", &self.external_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub request_id: Uuid,
    pub method: Method,
    /// Path relative to the upstream base URL.
    pub endpoint: String,
    pub params: BTreeMap<String, Value>,
    pub body: Option<Value>,
    pub credential: CallCredential,
}

impl UpstreamCall {
    /// Call for a request, using the upstream's per-type endpoint layout.
    pub fn for_request(request: &DataJudRequest, credential: CallCredential) -> Self {
        let number = request.process_number.trim();
        let (method, endpoint, body) = match request.request_type {
            RequestType::Process => (Method::GET, format!("api/v1/processos/{}", number), None),
            RequestType::Movement => (Method::GET, format!("api/v1/processos/{}/movimentacoes", number), None),
            RequestType::Party => (Method::GET, format!("api/v1/processos/{}/partes", number), None),
            RequestType::Document => (Method::GET, format!("api/v1/processos/{}/documentos", number), None),
            RequestType::Bulk => (
                Method::POST,
                "api/v1/processos/lote".to_string(),
                Some(serde_json::json!({ "processos": [number], "tribunal": request.court_id })),
            ),
        };
        let mut params = request.parameters.clone();
        params.insert("tribunal".into(), Value::String(request.court_id.clone()));
        Self {
            request_id: request.id,
            method,
            endpoint,
            params,
            body,
            credential,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
    pub size: u64,
    pub duration: Duration,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection to upstream failed: {0}")]
    Connection(String),

    #[error("upstream returned status {status}")]
    Status { status: u16, body: String },

    #[error("malformed upstream payload: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Timeouts, connection errors, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Connection(_) => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Malformed(_) => false,
        }
    }

    /// Whether the failure says something about upstream health.
    pub fn counts_against_breaker(&self) -> bool {
        self.is_retryable()
    }

    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "UPSTREAM_TIMEOUT",
            TransportError::Connection(_) => "UPSTREAM_UNREACHABLE",
            TransportError::Status { .. } => "UPSTREAM_STATUS",
            TransportError::Malformed(_) => "MALFORMED_RESPONSE",
        }
    }
}

/// Executes calls against DataJud. Retries on transient errors are the
/// implementation's business.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn execute(&self, call: UpstreamCall) -> Result<UpstreamResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use chrono::Utc;

    #[test]
    fn retryable_classification() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransportError::Connection("reset".into()).is_retryable());
        assert!(TransportError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(TransportError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!TransportError::Status { status: 404, body: String::new() }.is_retryable());
        assert!(!TransportError::Malformed("x".into()).is_retryable());
    }

    #[test]
    fn endpoint_per_request_type() {
        let req = DataJudRequest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            RequestType::Movement,
            Priority::Normal,
            "00012345620238260100",
            "TJSP",
            Utc::now(),
        );
        let cred = CallCredential {
            id: Uuid::new_v4(),
            external_id: "11222333000181".into(),
            secret: "s3cr3t".into(),
        };
        let call = UpstreamCall::for_request(&req, cred);
        assert_eq!(call.method, Method::GET);
        assert_eq!(call.endpoint, "api/v1/processos/00012345620238260100/movimentacoes");
        assert_eq!(call.params["tribunal"], "TJSP");
        assert!(!format!("{:?}", call).contains("s3cr3t"));
    }
}
