//! Health Routes
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (store answers queries)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
///
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Returns 200 if the metric store can serve a query.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match check_storage_health(&state).await {
        true => StatusCode::OK,
        false => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /health
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let storage_ok = check_storage_health(&state).await;

    Json(HealthResponse {
        status: if storage_ok { "healthy" } else { "unhealthy" }.to_string(),
        storage: if storage_ok { "ok" } else { "error" }.to_string(),
        backend: state.store.backend().to_string(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// An empty query for a name nothing is stored under
async fn check_storage_health(state: &AppState) -> bool {
    match state.store.get_metric("health.probe", Utc::now()).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Metric store health check failed");
            false
        }
    }
}
