//! Bulk queries: the single-item pipeline per item, at low priority, throttled.

use std::time::Instant;

use uuid::Uuid;

use crate::domain::{
    BulkItemResult, BulkQuery, BulkQueryItem, BulkQueryResponse, Priority, RequestStatus, RequestType, ValidationError,
};
use crate::error::{GatewayError, GatewayResult};
use crate::service::orchestrator::Orchestrator;

impl Orchestrator {
    /// Run every item in order. Item failures are reported per item; only an
    /// invalid batch fails the whole call.
    pub async fn bulk_query(&self, query: BulkQuery) -> GatewayResult<BulkQueryResponse> {
        let max = self.settings.bulk_max_items;
        if query.queries.is_empty() || query.queries.len() > max {
            return Err(ValidationError::new("queries", format!("expected between 1 and {} items", max)).into());
        }

        let bulk_id = Uuid::new_v4();
        let started_at = self.pipeline.clock().now();
        let throttle = self.settings.bulk_throttle;
        tracing::info!(bulk_id = %bulk_id, tenant_id = %query.tenant_id, items = query.queries.len(), "Bulk query started");

        let mut results = Vec::with_capacity(query.queries.len());
        for (index, item) in query.queries.iter().enumerate() {
            if index > 0 && !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }
            results.push(self.bulk_item(&query, index, item).await);
        }

        let succeeded = results
            .iter()
            .filter(|r| matches!(r.status, RequestStatus::Completed | RequestStatus::Cached))
            .count();
        let failed = results.len() - succeeded;
        tracing::info!(bulk_id = %bulk_id, succeeded, failed, "Bulk query finished");

        Ok(BulkQueryResponse {
            request_id: bulk_id,
            results,
            succeeded,
            failed,
            started_at,
            completed_at: self.pipeline.clock().now(),
        })
    }

    async fn bulk_item(&self, query: &BulkQuery, index: usize, item: &BulkQueryItem) -> BulkItemResult {
        let started = Instant::now();
        let outcome = match self.build(
            query.tenant_id,
            query.client_id,
            RequestType::Process,
            &item.process_number,
            &item.court_id,
            false,
        ) {
            Ok(mut request) => {
                request.priority = Priority::Low;
                self.run(request).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) => BulkItemResult {
                index,
                process_number: item.process_number.clone(),
                status: response.status,
                data: Some(response.data),
                from_cache: response.from_cache,
                error_code: None,
                error: None,
                duration_ms: response.duration_ms,
            },
            Err(e) => BulkItemResult {
                index,
                process_number: item.process_number.clone(),
                status: match e {
                    GatewayError::RetryScheduled { .. } => RequestStatus::Retrying,
                    _ => RequestStatus::Failed,
                },
                data: None,
                from_cache: false,
                error_code: Some(e.code().to_string()),
                error: Some(e.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        }
    }
}
