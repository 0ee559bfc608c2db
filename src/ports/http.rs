//! HTTP transport to the DataJud API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use url::Url;

use crate::ports::transport::{Transport, TransportError, UpstreamCall, UpstreamResponse};
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::timeouts::with_deadline;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        // a trailing slash makes `join` append instead of replacing the last segment
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).map_err(|e| TransportError::Connection(format!("invalid base url: {}", e)))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("datajud-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            timeout,
            max_attempts: 1,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        })
    }

    /// In-transport retries for transient errors. `max_attempts` includes the first try.
    pub fn with_retries(mut self, max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    fn url_for(&self, call: &UpstreamCall) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join(call.endpoint.trim_start_matches('/'))
            .map_err(|e| TransportError::Connection(format!("invalid endpoint: {}", e)))?;
        if !call.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &call.params {
                match v {
                    serde_json::Value::String(s) => pairs.append_pair(k, s),
                    other => pairs.append_pair(k, &other.to_string()),
                };
            }
        }
        Ok(url)
    }

    async fn attempt(&self, call: &UpstreamCall, url: Url) -> Result<UpstreamResponse, TransportError> {
        let started = Instant::now();
        let auth = HeaderValue::from_str(&format!("APIKey {}", call.credential.secret))
            .map_err(|_| TransportError::Connection("credential secret is not a valid header value".into()))?;
        let mut builder = self
            .client
            .request(call.method.clone(), url)
            .header(AUTHORIZATION, auth)
            .header(ACCEPT, "application/json")
            .header("x-cnpj", call.credential.external_id.as_str())
            .header("x-request-id", call.request_id.to_string());
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Connection(e.to_string())
            }
        })?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).chars().take(512).collect(),
            });
        }
        let body = serde_json::from_slice(&bytes).map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(UpstreamResponse {
            status: status.as_u16(),
            body,
            size: bytes.len() as u64,
            duration: started.elapsed(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, call: UpstreamCall) -> Result<UpstreamResponse, TransportError> {
        let url = self.url_for(&call)?;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = with_deadline(self.timeout, self.attempt(&call, url.clone())).await;
            match result {
                Err(e) if e.is_retryable() && attempts < self.max_attempts => {
                    let backoff = calculate_backoff(attempts, self.base_delay_ms, self.max_delay_ms);
                    tracing::info!(
                        request_id = %call.request_id,
                        attempt = attempts,
                        delay = ?backoff,
                        error = %e,
                        "Retrying upstream call"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }
}
