//! Synchronous request service.
//!
//! Runs the pipeline inline for latency-sensitive callers and surfaces
//! denials immediately instead of re-queueing. Retryable execution failures
//! are recorded on the request (`retrying` with a not-before instant) and
//! picked up later by the queue's retry sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::domain::{
    DataJudRequest, DocumentQuery, DomainEvent, MovementQuery, PartyQuery, ProcessQuery, QueryResponse,
    RequestStatus, RequestType, SubmitQuery, SubmitReceipt, ValidationError,
};
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;
use crate::ports::{RequestRepository, TransportError};
use crate::queue::QueueManager;
use crate::resilience::backoff::exponential_delay;
use crate::service::pipeline::Pipeline;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Base of the retry delay: `2^retry_count * retry_delay`.
    pub retry_delay: Duration,
    pub retry_ceiling: Duration,
    pub max_retries: u32,
    pub bulk_max_items: usize,
    /// Pause between bulk items.
    pub bulk_throttle: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            retry_ceiling: Duration::from_secs(5 * 60),
            max_retries: 3,
            bulk_max_items: 100,
            bulk_throttle: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    pub(crate) pipeline: Arc<Pipeline>,
    queue: Arc<QueueManager>,
    requests: Arc<dyn RequestRepository>,
    pub(crate) settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        pipeline: Arc<Pipeline>,
        queue: Arc<QueueManager>,
        requests: Arc<dyn RequestRepository>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            pipeline,
            queue,
            requests,
            settings,
        }
    }

    pub async fn query_process(&self, query: ProcessQuery) -> GatewayResult<QueryResponse> {
        let request = self
            .build(
                query.tenant_id,
                query.client_id,
                RequestType::Process,
                &query.process_number,
                &query.court_id,
                query.urgent,
            )?
            .with_process_id(query.process_id)
            .with_cache(query.use_cache);
        self.run(request).await
    }

    /// Paging defaults to page 1 and 20 items when the size is outside 1..=100.
    pub async fn query_movements(&self, mut query: MovementQuery) -> GatewayResult<QueryResponse> {
        query.normalize();
        if let (Some(from), Some(to)) = (query.date_from, query.date_to) {
            if from > to {
                return Err(ValidationError::new("date_from", "must not be after date_to").into());
            }
        }
        let request = self
            .build(
                query.tenant_id,
                query.client_id,
                RequestType::Movement,
                &query.process_number,
                &query.court_id,
                query.urgent,
            )?
            .with_parameters(query.parameters())
            .with_process_id(query.process_id)
            .with_cache(query.use_cache);
        self.run(request).await
    }

    pub async fn query_parties(&self, query: PartyQuery) -> GatewayResult<QueryResponse> {
        let request = self
            .build(
                query.tenant_id,
                query.client_id,
                RequestType::Party,
                &query.process_number,
                &query.court_id,
                query.urgent,
            )?
            .with_cache(query.use_cache);
        self.run(request).await
    }

    pub async fn query_documents(&self, query: DocumentQuery) -> GatewayResult<QueryResponse> {
        let mut request = self
            .build(
                query.tenant_id,
                query.client_id,
                RequestType::Document,
                &query.process_number,
                &query.court_id,
                query.urgent,
            )?
            .with_cache(query.use_cache);
        if let Some(document_id) = query.document_id.filter(|d| !d.trim().is_empty()) {
            let mut params = request.parameters.clone();
            params.insert("document_id".to_string(), document_id.trim().into());
            request = request.with_parameters(params);
        }
        self.run(request).await
    }

    /// Accept a request for background processing.
    pub async fn submit(&self, query: SubmitQuery) -> GatewayResult<SubmitReceipt> {
        let request = self
            .build(
                query.tenant_id,
                query.client_id,
                query.request_type,
                &query.process_number,
                &query.court_id,
                query.urgent,
            )?
            .with_parameters(query.parameters)
            .with_cache(query.use_cache);
        let receipt = SubmitReceipt {
            request_id: request.id,
            status: RequestStatus::Pending,
            priority: request.priority,
            estimated_duration_ms: self
                .pipeline
                .policy()
                .estimate_duration(request.request_type)
                .as_millis() as u64,
        };
        self.queue.enqueue(request).await?;
        tracing::info!(request_id = %receipt.request_id, priority = %receipt.priority, "Request accepted for queued processing");
        Ok(receipt)
    }

    pub async fn request_status(&self, id: Uuid) -> GatewayResult<DataJudRequest> {
        self.requests
            .find(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("request {}", id)))
    }

    pub(crate) fn build(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        request_type: RequestType,
        process_number: &str,
        court_id: &str,
        urgent: bool,
    ) -> GatewayResult<DataJudRequest> {
        let policy = self.pipeline.policy();
        policy.validate_process_number(process_number)?;
        if court_id.trim().is_empty() {
            return Err(ValidationError::new("court_id", "is required").into());
        }
        let priority = policy.calculate_priority(request_type, urgent);
        Ok(DataJudRequest::new(
            tenant_id,
            client_id,
            request_type,
            priority,
            process_number.trim(),
            court_id.trim(),
            self.pipeline.clock().now(),
        )
        .with_max_retries(self.settings.max_retries))
    }

    /// Cache, then one admission and execution pass.
    pub(crate) async fn run(&self, mut request: DataJudRequest) -> GatewayResult<QueryResponse> {
        let started = Instant::now();
        let clock = Arc::clone(self.pipeline.clock());
        let request_type = request.request_type;

        if let Some(hit) = self.pipeline.lookup_cache(&request).await {
            request.mark_cached(hit.response.clone(), clock.now());
            self.requests.save(&request).await?;
            self.publish_completed(&request, true).await;
            let duration = started.elapsed();
            metrics::record_request(request_type.as_str(), "cached", duration);
            return Ok(QueryResponse {
                request_id: request.id,
                status: RequestStatus::Cached,
                data: hit.response.data,
                from_cache: true,
                cached_at: Some(hit.cached_at),
                duration_ms: duration.as_millis() as u64,
                credential_id: None,
            });
        }

        request.start_processing(clock.now());
        self.requests.save(&request).await?;

        match self.pipeline.execute(&mut request).await {
            Ok(response) => {
                let data = response.data.clone();
                request.complete(response, clock.now());
                self.persist(&request).await;
                self.publish_completed(&request, false).await;
                let duration = started.elapsed();
                metrics::record_request(request_type.as_str(), "completed", duration);
                tracing::debug!(request_id = %request.id, duration_ms = duration.as_millis() as u64, "Request completed");
                Ok(QueryResponse {
                    request_id: request.id,
                    status: RequestStatus::Completed,
                    data,
                    from_cache: false,
                    cached_at: None,
                    duration_ms: duration.as_millis() as u64,
                    credential_id: request.credential_id,
                })
            }
            Err(GatewayError::Execution(e)) => {
                let result = self.execution_failed(request, e).await;
                metrics::record_request(request_type.as_str(), "failed", started.elapsed());
                Err(result)
            }
            Err(err) => {
                let now = clock.now();
                request.fail(err.code(), err.to_string(), now);
                self.persist(&request).await;
                self.pipeline
                    .events()
                    .publish(DomainEvent::request_failed(
                        request.id,
                        err.code(),
                        &err.to_string(),
                        request.retry_count,
                        false,
                        now,
                    ))
                    .await;
                metrics::record_request(request_type.as_str(), "rejected", started.elapsed());
                Err(err)
            }
        }
    }

    /// Schedule a retry for transient failures with retries left, fail otherwise.
    async fn execution_failed(&self, mut request: DataJudRequest, error: TransportError) -> GatewayError {
        let now = self.pipeline.clock().now();
        let message = error.to_string();
        let events = self.pipeline.events();

        if !error.is_retryable() {
            request.fail("EXECUTION_FAILED", &message, now);
            self.persist(&request).await;
            events
                .publish(DomainEvent::request_failed(request.id, "EXECUTION_FAILED", &message, request.retry_count, false, now))
                .await;
            return GatewayError::Execution(error);
        }

        let delay = exponential_delay(request.retry_count, self.settings.retry_delay, self.settings.retry_ceiling);
        match request.schedule_retry(delay, now) {
            Ok(retry_at) => {
                self.persist(&request).await;
                events
                    .publish(DomainEvent::request_failed(request.id, error.code(), &message, request.retry_count, true, now))
                    .await;
                events
                    .publish(DomainEvent::request_retrying(
                        request.id,
                        request.retry_count,
                        request.max_retries,
                        retry_at,
                        now,
                    ))
                    .await;
                tracing::info!(request_id = %request.id, retry_count = request.retry_count, retry_at = %retry_at, "Retry scheduled");
                GatewayError::RetryScheduled {
                    request_id: request.id,
                    retry_at,
                    retry_count: request.retry_count,
                    source: error,
                }
            }
            Err(_) => {
                request.fail("RETRIES_EXHAUSTED", &message, now);
                self.persist(&request).await;
                events
                    .publish(DomainEvent::request_failed(request.id, "RETRIES_EXHAUSTED", &message, request.retry_count, false, now))
                    .await;
                GatewayError::RetriesExhausted {
                    request_id: request.id,
                    retry_count: request.retry_count,
                    source: error,
                }
            }
        }
    }

    async fn publish_completed(&self, request: &DataJudRequest, from_cache: bool) {
        let (status_code, duration_ms) = request
            .response
            .as_ref()
            .map(|r| (r.status_code, r.duration_ms))
            .unwrap_or((200, 0));
        self.pipeline
            .events()
            .publish(DomainEvent::request_completed(
                request.id,
                request.credential_id,
                status_code,
                duration_ms,
                from_cache,
                self.pipeline.clock().now(),
            ))
            .await;
    }

    async fn persist(&self, request: &DataJudRequest) {
        if let Err(e) = self.requests.save(request).await {
            tracing::warn!(request_id = %request.id, error = %e, "Failed to persist request");
        }
    }
}
