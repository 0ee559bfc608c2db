//! Query API handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    BulkQuery, BulkQueryResponse, DataJudRequest, DocumentQuery, MovementQuery, PartyQuery, ProcessQuery,
    QueryResponse, SubmitQuery, ValidationError,
};
use crate::error::GatewayResult;
use crate::http::server::AppState;

/// Malformed bodies become `INVALID_REQUEST` like any other validation failure.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> GatewayResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ValidationError::new("body", rejection.body_text()).into())
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn query_process(
    State(state): State<AppState>,
    payload: Result<Json<ProcessQuery>, JsonRejection>,
) -> GatewayResult<Json<QueryResponse>> {
    Ok(Json(state.orchestrator.query_process(body(payload)?).await?))
}

pub async fn query_movements(
    State(state): State<AppState>,
    payload: Result<Json<MovementQuery>, JsonRejection>,
) -> GatewayResult<Json<QueryResponse>> {
    Ok(Json(state.orchestrator.query_movements(body(payload)?).await?))
}

pub async fn query_parties(
    State(state): State<AppState>,
    payload: Result<Json<PartyQuery>, JsonRejection>,
) -> GatewayResult<Json<QueryResponse>> {
    Ok(Json(state.orchestrator.query_parties(body(payload)?).await?))
}

pub async fn query_documents(
    State(state): State<AppState>,
    payload: Result<Json<DocumentQuery>, JsonRejection>,
) -> GatewayResult<Json<QueryResponse>> {
    Ok(Json(state.orchestrator.query_documents(body(payload)?).await?))
}

pub async fn bulk_query(
    State(state): State<AppState>,
    payload: Result<Json<BulkQuery>, JsonRejection>,
) -> GatewayResult<Json<BulkQueryResponse>> {
    Ok(Json(state.orchestrator.bulk_query(body(payload)?).await?))
}

pub async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<SubmitQuery>, JsonRejection>,
) -> GatewayResult<impl IntoResponse> {
    let receipt = state.orchestrator.submit(body(payload)?).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn request_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> GatewayResult<Json<DataJudRequest>> {
    Ok(Json(state.orchestrator.request_status(id).await?))
}
