//! End-to-end flows through the orchestrator and queue with a scripted upstream.

use std::time::Duration;

use datajud_gateway::clock::Clock;
use datajud_gateway::domain::{EventKind, RequestStatus, RequestType, SubmitQuery};
use datajud_gateway::ports::{RequestRepository, StateRepository};
use datajud_gateway::queue::ProcessOutcome;
use datajud_gateway::resilience::CircuitState;
use datajud_gateway::GatewayError;
use uuid::Uuid;

mod common;
use common::{process_number, process_query, test_config, CNPJ_A, CNPJ_B, COURT};

#[tokio::test]
async fn quota_exhaustion_reports_future_reset() {
    let t = common::gateway().await;
    let (tenant, creds) = t.tenant(&[(CNPJ_A, 2)]).await;
    let orchestrator = t.gateway.orchestrator();

    for n in 1..=2 {
        let response = orchestrator
            .query_process(process_query(tenant, &process_number(n)))
            .await
            .unwrap();
        assert_eq!(response.status, RequestStatus::Completed);
        assert!(!response.from_cache);
        assert_eq!(response.credential_id, Some(creds[0].id));
    }
    let remaining = t.gateway.management().credentials(tenant).unwrap();
    assert_eq!(remaining[0].remaining, 0);

    let err = orchestrator
        .query_process(process_query(tenant, &process_number(3)))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::QuotaExhausted { .. }), "unexpected error: {err}");
    assert!(err.is_retryable());
    let retry_at = err.retry_at().expect("reset instant");
    assert!(retry_at > t.clock.now());
    assert_eq!(t.transport.call_count(), 2);
}

#[tokio::test]
async fn credential_window_restarts_with_daily_quota() {
    let t = common::gateway().await;
    let (tenant, creds) = t.tenant(&[(CNPJ_A, 2)]).await;
    let orchestrator = t.gateway.orchestrator();

    for n in 1..=2 {
        orchestrator
            .query_process(process_query(tenant, &process_number(n)))
            .await
            .unwrap();
    }

    // Just past the quota reset, well inside the 24h credential window.
    let until_reset = (creds[0].reset_at - t.clock.now()).to_std().unwrap();
    t.advance(until_reset + Duration::from_secs(1));

    let response = orchestrator
        .query_process(process_query(tenant, &process_number(3)))
        .await
        .unwrap();
    assert_eq!(response.status, RequestStatus::Completed);
    assert_eq!(response.credential_id, Some(creds[0].id));
    let view = t.gateway.management().credentials(tenant).unwrap();
    assert_eq!(view[0].daily_usage, 1);
    assert_eq!(view[0].remaining, 1);
    assert_eq!(t.transport.call_count(), 3);
}

#[tokio::test]
async fn open_breaker_blocks_calls_until_timeout() {
    let mut config = test_config();
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.timeout_secs = 30;
    let t = common::gateway_with(config).await;
    let (tenant, _) = t.tenant(&[(CNPJ_A, 100)]).await;
    let orchestrator = t.gateway.orchestrator();

    t.transport.push_status(503);
    t.transport.push_status(503);
    for n in 1..=2 {
        let err = orchestrator
            .query_process(process_query(tenant, &process_number(n)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RetryScheduled { .. }), "unexpected error: {err}");
    }
    let breaker = format!("datajud:{}", COURT.to_lowercase());
    let stats = t.gateway.management().breaker_stats(&breaker).unwrap();
    assert_eq!(stats.state, CircuitState::Open);

    t.advance(Duration::from_secs(10));
    let err = orchestrator
        .query_process(process_query(tenant, &process_number(3)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CIRCUIT_BREAKER_OPEN");
    assert!(err.retry_at().is_some());
    assert_eq!(t.transport.call_count(), 2, "open breaker must not reach the upstream");

    t.advance(Duration::from_secs(21));
    let response = orchestrator
        .query_process(process_query(tenant, &process_number(4)))
        .await
        .unwrap();
    assert_eq!(response.status, RequestStatus::Completed);
    assert_eq!(t.transport.call_count(), 3);
}

#[tokio::test]
async fn urgent_request_is_processed_before_earlier_low_priority() {
    let t = common::gateway().await;
    let (tenant, _) = t.tenant(&[(CNPJ_A, 100)]).await;
    let orchestrator = t.gateway.orchestrator();

    let low = orchestrator
        .submit(SubmitQuery {
            tenant_id: tenant,
            client_id: Uuid::new_v4(),
            request_type: RequestType::Bulk,
            process_number: process_number(1),
            court_id: COURT.into(),
            parameters: Default::default(),
            use_cache: false,
            urgent: false,
        })
        .await
        .unwrap();
    let urgent = orchestrator
        .submit(SubmitQuery {
            tenant_id: tenant,
            client_id: Uuid::new_v4(),
            request_type: RequestType::Party,
            process_number: process_number(2),
            court_id: COURT.into(),
            parameters: Default::default(),
            use_cache: false,
            urgent: true,
        })
        .await
        .unwrap();
    assert_eq!(low.priority.to_string(), "low");
    assert_eq!(urgent.priority.to_string(), "urgent");

    t.gateway.queue().start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while t.gateway.queue().stats().completed < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both requests processed");
    t.gateway.queue().shutdown().await;

    let endpoints = t.transport.endpoints();
    assert_eq!(endpoints.len(), 2);
    assert!(endpoints[0].ends_with("/partes"), "urgent first, got {:?}", endpoints);
    assert!(endpoints[1].ends_with("/lote"));

    let stored = t.store.find(urgent.request_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Completed);
}

#[tokio::test]
async fn second_identical_query_is_served_from_cache() {
    let t = common::gateway().await;
    let (tenant, _) = t.tenant(&[(CNPJ_A, 100)]).await;
    let orchestrator = t.gateway.orchestrator();
    let number = process_number(42);

    let first = orchestrator.query_process(process_query(tenant, &number)).await.unwrap();
    assert!(!first.from_cache);

    t.advance(Duration::from_secs(30 * 60));
    let second = orchestrator.query_process(process_query(tenant, &number)).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.status, RequestStatus::Cached);
    assert_eq!(second.data, first.data);
    assert!(second.cached_at.is_some());
    assert_eq!(t.transport.call_count(), 1);

    let kinds: Vec<EventKind> = t.store.events().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::CacheStored));
    assert!(kinds.contains(&EventKind::CacheHit));
}

#[tokio::test]
async fn rate_limited_credential_falls_back_to_alternative() {
    let t = common::gateway().await;
    let (tenant, creds) = t.tenant(&[(CNPJ_A, 1), (CNPJ_B, 5)]).await;
    let orchestrator = t.gateway.orchestrator();

    // A 404 consumes the first credential's window without debiting its quota.
    t.transport.push_status(404);
    orchestrator
        .query_process(process_query(tenant, &process_number(1)))
        .await
        .unwrap_err();

    let response = orchestrator
        .query_process(process_query(tenant, &process_number(2)))
        .await
        .unwrap();
    assert_eq!(response.credential_id, Some(creds[1].id));
    assert_eq!(t.transport.credential_ids(), vec![creds[0].id, creds[1].id]);
    assert!(t.store.events().iter().any(|e| e.kind == EventKind::RateLimitExceeded));
}

#[tokio::test]
async fn tenant_limit_denial_is_surfaced_with_reset() {
    let mut config = test_config();
    config.rate_limit.tenant_max_requests = 1;
    let t = common::gateway_with(config).await;
    let (tenant, _) = t.tenant(&[(CNPJ_A, 100)]).await;
    let orchestrator = t.gateway.orchestrator();

    orchestrator
        .query_process(process_query(tenant, &process_number(1)))
        .await
        .unwrap();
    let err = orchestrator
        .query_process(process_query(tenant, &process_number(2)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
    assert!(err.retry_at().is_some());
    assert!(t.store.events().iter().any(|e| e.kind == EventKind::RateLimitExceeded));
}

#[tokio::test]
async fn non_retryable_upstream_error_fails_without_tripping_breaker() {
    let mut config = test_config();
    config.circuit_breaker.failure_threshold = 1;
    let t = common::gateway_with(config).await;
    let (tenant, _) = t.tenant(&[(CNPJ_A, 100)]).await;

    t.transport.push_status(404);
    let err = t
        .gateway
        .orchestrator()
        .query_process(process_query(tenant, &process_number(1)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EXECUTION_FAILED");
    assert!(!err.is_retryable());

    let breaker = format!("datajud:{}", COURT.to_lowercase());
    let stats = t.gateway.management().breaker_stats(&breaker).unwrap();
    assert_eq!(stats.state, CircuitState::Closed);
}

#[tokio::test]
async fn retry_that_finds_its_lane_full_is_picked_up_by_the_sweep() {
    let mut config = test_config();
    config.queue.urgent_capacity = 1;
    let t = common::gateway_with(config).await;
    let (tenant, _) = t.tenant(&[(CNPJ_A, 100)]).await;
    let orchestrator = t.gateway.orchestrator();
    let queue = t.gateway.queue();
    let urgent = |n| SubmitQuery {
        tenant_id: tenant,
        client_id: Uuid::new_v4(),
        request_type: RequestType::Movement,
        process_number: process_number(n),
        court_id: COURT.into(),
        parameters: Default::default(),
        use_cache: false,
        urgent: true,
    };

    let first = orchestrator.submit(urgent(1)).await.unwrap();
    let dequeued = queue.dequeue().expect("first request queued");
    orchestrator.submit(urgent(2)).await.unwrap();

    t.transport.push_status(503);
    let outcome = queue.process(dequeued).await;
    assert!(matches!(outcome, ProcessOutcome::Retrying(_)), "unexpected outcome: {outcome:?}");
    assert_eq!(queue.stats().total_queued, 1);
    let stored = t.store.find(first.request_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Retrying);

    t.advance(Duration::from_secs(3600));
    queue.dequeue().expect("second request queued");
    assert_eq!(queue.retry_failed_requests().await.unwrap(), 1);
    let stored = t.store.find(first.request_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
    assert_eq!(queue.dequeue().map(|r| r.id), Some(first.request_id));
}

#[tokio::test]
async fn state_survives_restart_through_repository() {
    let t = common::gateway().await;
    let (tenant, _) = t.tenant(&[(CNPJ_A, 10)]).await;
    t.gateway
        .orchestrator()
        .query_process(process_query(tenant, &process_number(1)))
        .await
        .unwrap();
    t.gateway.management().persist_all().await.unwrap();

    let snapshot = t.store.load().await.unwrap();
    assert_eq!(snapshot.pools.len(), 1);
    assert!(!snapshot.limiters.is_empty());
}
