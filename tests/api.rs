//! HTTP surface: query and admin routers driven with `oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

mod common;
use common::{process_number, CNPJ_A, COURT};

const ADMIN_KEY: &str = "test-admin-key";

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_KEY));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn process_body(tenant: Uuid, number: &str) -> Value {
    json!({
        "tenant_id": tenant,
        "client_id": Uuid::new_v4(),
        "process_number": number,
        "court_id": COURT,
    })
}

#[tokio::test]
async fn health_answers_without_auth() {
    let t = common::gateway().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(t.gateway.query_router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn process_query_round_trip_and_request_lookup() {
    let t = common::gateway().await;
    let (tenant, creds) = t.tenant(&[(CNPJ_A, 10)]).await;

    let (status, body) = send(
        t.gateway.query_router(),
        json_request(Method::POST, "/v1/process", process_body(tenant, &process_number(7))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["from_cache"], false);
    assert_eq!(body["credential_id"], json!(creds[0].id));

    let id = body["request_id"].as_str().unwrap().to_string();
    let request = Request::builder()
        .uri(format!("/v1/requests/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, stored) = send(t.gateway.query_router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["status"], "completed");
}

#[tokio::test]
async fn invalid_body_is_a_json_400() {
    let t = common::gateway().await;
    let (tenant, _) = t.tenant(&[(CNPJ_A, 10)]).await;

    let (status, body) = send(
        t.gateway.query_router(),
        json_request(Method::POST, "/v1/process", process_body(tenant, "123")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, body) = send(
        t.gateway.query_router(),
        json_request(Method::POST, "/v1/process", json!({ "tenant_id": "not-a-uuid" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn exhausted_quota_is_429_with_retry_after() {
    let t = common::gateway().await;
    let (tenant, _) = t.tenant(&[(CNPJ_A, 1)]).await;

    let (status, _) = send(
        t.gateway.query_router(),
        json_request(Method::POST, "/v1/process", process_body(tenant, &process_number(1))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = t
        .gateway
        .query_router()
        .oneshot(json_request(Method::POST, "/v1/process", process_body(tenant, &process_number(2))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "QUOTA_EXHAUSTED");
    assert!(body["retry_at"].is_string());
}

#[tokio::test]
async fn unknown_request_id_is_404() {
    let t = common::gateway().await;
    let request = Request::builder()
        .uri(format!("/v1/requests/{}", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(t.gateway.query_router(), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn submit_is_accepted_and_queued() {
    let t = common::gateway().await;
    let (tenant, _) = t.tenant(&[(CNPJ_A, 10)]).await;
    let body = json!({
        "tenant_id": tenant,
        "client_id": Uuid::new_v4(),
        "request_type": "movement",
        "process_number": process_number(3),
        "court_id": COURT,
        "urgent": true,
    });
    let (status, receipt) = send(t.gateway.query_router(), json_request(Method::POST, "/v1/requests", body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(receipt["status"], "pending");
    assert_eq!(receipt["priority"], "urgent");
    assert_eq!(t.gateway.queue().stats().total_queued, 1);
}

#[tokio::test]
async fn admin_rejects_missing_or_wrong_key() {
    let t = common::gateway().await;

    let request = Request::builder().uri("/admin/status").body(Body::empty()).unwrap();
    let response = t.gateway.admin_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/admin/status")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let response = t.gateway.admin_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, body) = send(t.gateway.admin_router(), admin_request(Method::GET, "/admin/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "operational");
}

#[tokio::test]
async fn admin_manages_pools_and_credentials() {
    let t = common::gateway().await;
    let tenant = Uuid::new_v4();

    let (status, pool) = send(
        t.gateway.admin_router(),
        admin_request(
            Method::POST,
            "/admin/pools",
            Some(json!({ "tenant_id": tenant, "name": "primary", "strategy": "round_robin" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(pool["strategy"], "round_robin");

    let uri = format!("/admin/pools/{}/credentials", tenant);
    let (status, credential) = send(
        t.gateway.admin_router(),
        admin_request(
            Method::POST,
            &uri,
            Some(json!({ "name": "main", "external_id": CNPJ_A, "secret": "s3cret", "daily_limit": 50 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(credential["external_id"], "11.222.333/0001-81");
    assert!(credential.get("secret").is_none(), "secrets never leave the gateway");

    let (status, body) = send(
        t.gateway.admin_router(),
        admin_request(
            Method::POST,
            &uri,
            Some(json!({ "name": "bad", "external_id": "11222333000100", "secret": "s" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, listed) = send(t.gateway.admin_router(), admin_request(Method::GET, &uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, _) = send(
        t.gateway.admin_router(),
        admin_request(Method::GET, &format!("/admin/pools/{}", Uuid::new_v4()), None),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn admin_breaker_lifecycle() {
    let t = common::gateway().await;

    let (status, created) = send(
        t.gateway.admin_router(),
        admin_request(
            Method::POST,
            "/admin/breakers",
            Some(json!({ "name": "datajud:trf3", "failure_threshold": 2 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["state"], "closed");
    assert_eq!(created["config"]["failure_threshold"], 2);

    let (status, opened) = send(
        t.gateway.admin_router(),
        admin_request(Method::POST, "/admin/breakers/datajud:trf3/force-open", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(opened["state"], "open");

    let (status, closed) = send(
        t.gateway.admin_router(),
        admin_request(Method::POST, "/admin/breakers/datajud:trf3/force-close", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["state"], "closed");

    let (status, _) = send(
        t.gateway.admin_router(),
        admin_request(Method::DELETE, "/admin/breakers/datajud:trf3", None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        t.gateway.admin_router(),
        admin_request(Method::GET, "/admin/breakers/datajud:trf3", None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}
