use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admin::AdminState;
use crate::cache::CacheStats;
use crate::credentials::{CredentialView, PoolStats, SelectionStrategy};
use crate::error::GatewayResult;
use crate::queue::QueueStats;
use crate::ratelimit::{LimiterStats, Tier};
use crate::resilience::{BreakerConfig, BreakerStats, HealthStatus, HealthSummary};
use crate::service::NewCredential;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub health: HealthSummary,
    pub queue: QueueStats,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let health = state.management.health_summary();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: match health.status {
            HealthStatus::Healthy => "operational",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        },
        health,
        queue: state.queue.stats(),
    })
}

pub async fn get_health(State(state): State<AdminState>) -> Json<HealthSummary> {
    Json(state.management.health_summary())
}

// Breakers

/// Breaker settings; omitted fields take the configured defaults.
#[derive(Debug, Default, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub max_half_open_requests: Option<u32>,
}

impl BreakerSettings {
    fn merge(&self, base: BreakerConfig) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            success_threshold: self.success_threshold.unwrap_or(base.success_threshold),
            timeout: self.timeout_secs.map(Duration::from_secs).unwrap_or(base.timeout),
            max_half_open_requests: self.max_half_open_requests.unwrap_or(base.max_half_open_requests),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBreaker {
    pub name: String,
    #[serde(flatten)]
    pub settings: BreakerSettings,
}

pub async fn list_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerStats>> {
    Json(state.management.list_breakers())
}

pub async fn create_breaker(
    State(state): State<AdminState>,
    Json(body): Json<CreateBreaker>,
) -> GatewayResult<(StatusCode, Json<BreakerStats>)> {
    let config = body.settings.merge(state.config.load().circuit_breaker.breaker_config());
    let stats = state.management.create_breaker(&body.name, Some(config)).await?;
    Ok((StatusCode::CREATED, Json(stats)))
}

pub async fn get_breaker(State(state): State<AdminState>, Path(name): Path<String>) -> GatewayResult<Json<BreakerStats>> {
    Ok(Json(state.management.breaker_stats(&name)?))
}

pub async fn remove_breaker(State(state): State<AdminState>, Path(name): Path<String>) -> GatewayResult<StatusCode> {
    state.management.remove_breaker(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_breaker(State(state): State<AdminState>, Path(name): Path<String>) -> GatewayResult<Json<BreakerStats>> {
    Ok(Json(state.management.reset_breaker(&name).await?))
}

pub async fn force_open_breaker(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> GatewayResult<Json<BreakerStats>> {
    Ok(Json(state.management.force_open(&name).await?))
}

pub async fn force_close_breaker(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> GatewayResult<Json<BreakerStats>> {
    Ok(Json(state.management.force_closed(&name).await?))
}

// Pools

#[derive(Debug, Deserialize)]
pub struct CreatePool {
    pub tenant_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub strategy: Option<SelectionStrategy>,
}

#[derive(Debug, Deserialize)]
pub struct StrategyUpdate {
    pub strategy: SelectionStrategy,
}

#[derive(Debug, Deserialize)]
pub struct ActiveUpdate {
    pub active: bool,
}

pub async fn list_pools(State(state): State<AdminState>) -> Json<Vec<PoolStats>> {
    Json(state.management.list_pools())
}

pub async fn create_pool(
    State(state): State<AdminState>,
    Json(body): Json<CreatePool>,
) -> GatewayResult<(StatusCode, Json<PoolStats>)> {
    let stats = state.management.create_pool(body.tenant_id, &body.name, body.strategy).await?;
    Ok((StatusCode::CREATED, Json(stats)))
}

pub async fn get_pool(State(state): State<AdminState>, Path(tenant_id): Path<Uuid>) -> GatewayResult<Json<PoolStats>> {
    Ok(Json(state.management.pool_stats(tenant_id)?))
}

pub async fn remove_pool(State(state): State<AdminState>, Path(tenant_id): Path<Uuid>) -> GatewayResult<StatusCode> {
    state.management.remove_pool(tenant_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_credentials(
    State(state): State<AdminState>,
    Path(tenant_id): Path<Uuid>,
) -> GatewayResult<Json<Vec<CredentialView>>> {
    Ok(Json(state.management.credentials(tenant_id)?))
}

pub async fn add_credential(
    State(state): State<AdminState>,
    Path(tenant_id): Path<Uuid>,
    Json(body): Json<NewCredential>,
) -> GatewayResult<(StatusCode, Json<CredentialView>)> {
    let view = state.management.add_credential(tenant_id, body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn remove_credential(
    State(state): State<AdminState>,
    Path((tenant_id, credential_id)): Path<(Uuid, Uuid)>,
) -> GatewayResult<Json<CredentialView>> {
    Ok(Json(state.management.remove_credential(tenant_id, credential_id).await?))
}

pub async fn set_credential_active(
    State(state): State<AdminState>,
    Path((tenant_id, credential_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ActiveUpdate>,
) -> GatewayResult<Json<CredentialView>> {
    Ok(Json(
        state
            .management
            .set_credential_active(tenant_id, credential_id, body.active)
            .await?,
    ))
}

pub async fn set_strategy(
    State(state): State<AdminState>,
    Path(tenant_id): Path<Uuid>,
    Json(body): Json<StrategyUpdate>,
) -> GatewayResult<Json<PoolStats>> {
    Ok(Json(state.management.set_strategy(tenant_id, body.strategy).await?))
}

pub async fn reset_pool_usage(
    State(state): State<AdminState>,
    Path(tenant_id): Path<Uuid>,
) -> GatewayResult<Json<PoolStats>> {
    Ok(Json(state.management.reset_usage(tenant_id).await?))
}

// Rate limits, cache, queue

pub async fn rate_limit_stats(State(state): State<AdminState>) -> Json<Vec<LimiterStats>> {
    Json(state.management.rate_limit_stats())
}

pub async fn reset_rate_limit(
    State(state): State<AdminState>,
    Path((tier, key)): Path<(Tier, String)>,
) -> GatewayResult<StatusCode> {
    state.management.reset_rate_limit(tier, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cache_stats(State(state): State<AdminState>) -> Json<CacheStats> {
    Json(state.management.cache_stats())
}

pub async fn clear_cache(State(state): State<AdminState>) -> StatusCode {
    state.management.clear_cache();
    StatusCode::NO_CONTENT
}

pub async fn queue_stats(State(state): State<AdminState>) -> Json<QueueStats> {
    Json(state.queue.stats())
}
