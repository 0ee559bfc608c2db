//! Administrative API.
//!
//! Every route sits behind the bearer-key middleware and delegates to
//! [`ManagementService`] or the queue manager.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::queue::QueueManager;
use crate::service::ManagementService;
use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub management: Arc<ManagementService>,
    pub queue: Arc<QueueManager>,
    pub config: Arc<ArcSwap<GatewayConfig>>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/health", get(get_health))
        .route("/admin/breakers", get(list_breakers).post(create_breaker))
        .route("/admin/breakers/{name}", get(get_breaker).delete(remove_breaker))
        .route("/admin/breakers/{name}/reset", post(reset_breaker))
        .route("/admin/breakers/{name}/force-open", post(force_open_breaker))
        .route("/admin/breakers/{name}/force-close", post(force_close_breaker))
        .route("/admin/pools", get(list_pools).post(create_pool))
        .route("/admin/pools/{tenant_id}", get(get_pool).delete(remove_pool))
        .route("/admin/pools/{tenant_id}/credentials", get(list_credentials).post(add_credential))
        .route("/admin/pools/{tenant_id}/credentials/{credential_id}", delete(remove_credential))
        .route("/admin/pools/{tenant_id}/credentials/{credential_id}/active", put(set_credential_active))
        .route("/admin/pools/{tenant_id}/strategy", put(set_strategy))
        .route("/admin/pools/{tenant_id}/reset", post(reset_pool_usage))
        .route("/admin/rate-limits", get(rate_limit_stats))
        .route("/admin/rate-limits/{tier}/{key}/reset", post(reset_rate_limit))
        .route("/admin/cache", get(cache_stats).delete(clear_cache))
        .route("/admin/queue", get(queue_stats))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
