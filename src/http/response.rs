//! Error responses.
//!
//! Every failure leaves as `{code, message, retry_at}`. Recoverable denials
//! also carry a `Retry-After` header when the retry instant is known.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::queue::QueueError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
}

pub fn status_for(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
        GatewayError::RateLimited(_) | GatewayError::QuotaExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::Queue(QueueError::Full { .. }) => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::CircuitOpen { .. }
        | GatewayError::NoProvider(_)
        | GatewayError::Queue(_)
        | GatewayError::Unavailable(_)
        | GatewayError::RetryScheduled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::CredentialNotFound(_) | GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::Pool(_) | GatewayError::Configuration(_) => StatusCode::CONFLICT,
        GatewayError::Execution(_) | GatewayError::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
        GatewayError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() && !self.is_retryable() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }

        let retry_at = self.retry_at();
        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            retry_at,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(at) = retry_at {
            let secs = (at - Utc::now()).num_seconds().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
