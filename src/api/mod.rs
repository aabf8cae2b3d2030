//! Statboard reporter API
//!
//! Read-only HTTP access to stored series, built with Axum.
//!
//! # Endpoints
//!
//! ## Series
//! - `GET /api/v1/metrics/:name?since=YYYY-MM-DD` - Points of one metric after `since`
//! - `GET /api/v1/dashboard` - Every configured metric, windowed for charting
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use statboard::api::{serve, AppState};
//! use statboard::config::Config;
//! use statboard::storage::open_store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default()?;
//!     let store = open_store(&config.storage)?;
//!
//!     serve(AppState::from_config(store, &config)).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, ChartSpec};

use axum::{http::HeaderValue, routing::get, Router};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/metrics/:name", get(routes::series::get_series))
        .route("/dashboard", get(routes::series::dashboard));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config.cors_origins);
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

/// Permissive when no origins are configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring malformed CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(allowed))
    }
}

/// Start the API server
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let addr = state.addr();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Statboard reporter listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Statboard reporter shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dto::{DashboardResponse, SeriesResponse};
    use crate::config::ReporterConfig;
    use crate::series::{Granularity, MetricPoint};
    use crate::storage::{MetricStore, SqliteStore};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::{Datelike, TimeZone, Utc};
    use tempfile::tempdir;
    use tower::util::ServiceExt;

    async fn create_test_app() -> (Router, Arc<dyn MetricStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store: Arc<dyn MetricStore> =
            Arc::new(SqliteStore::open(dir.path().join("statboard.db")).unwrap());

        let charts = vec![
            ChartSpec {
                name: "fitbit.steps".into(),
                chart_name: "Steps".into(),
                color: Some("#1f77b4".into()),
                granularity: Granularity::Month,
                lookback_months: 2,
            },
            ChartSpec {
                name: "github.contributions".into(),
                chart_name: "Contributions".into(),
                color: None,
                granularity: Granularity::Day,
                lookback_months: 1,
            },
        ];

        let state = AppState::new(Arc::clone(&store), charts, ReporterConfig::default());
        (build_router(state), store, dir)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _store, _dir) = create_test_app().await;
        let (status, _) = get(app, "/health/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready_tracks_store() {
        let (app, store, _dir) = create_test_app().await;
        let (status, _) = get(app.clone(), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);

        store.close().await.unwrap();
        let (status, _) = get(app, "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_series_since_is_exclusive() {
        let (app, store, _dir) = create_test_app().await;
        let jan = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        store
            .write_metric(&MetricPoint::new("fitbit.steps", jan).value(3.0))
            .await
            .unwrap();

        let (status, body) = get(app.clone(), "/api/v1/metrics/fitbit.steps?since=2017-12-31").await;
        assert_eq!(status, StatusCode::OK);
        let series: SeriesResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(series.points.len(), 1);
        assert_eq!(series.points[0].value, 3.0);

        let (_, body) = get(app, "/api/v1/metrics/fitbit.steps?since=2018-01-01").await;
        let series: SeriesResponse = serde_json::from_slice(&body).unwrap();
        assert!(series.points.is_empty());
    }

    #[tokio::test]
    async fn test_series_unknown_metric_is_empty() {
        let (app, _store, _dir) = create_test_app().await;
        let (status, body) = get(app, "/api/v1/metrics/strava.distance").await;
        assert_eq!(status, StatusCode::OK);
        let series: SeriesResponse = serde_json::from_slice(&body).unwrap();
        assert!(series.points.is_empty());
    }

    #[tokio::test]
    async fn test_series_bad_since() {
        let (app, _store, _dir) = create_test_app().await;
        let (status, body) = get(app, "/api/v1/metrics/fitbit.steps?since=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["error"]["code"], "VALIDATION_ERROR");
        assert!(error["request_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_dashboard_windows_and_omits_empty() {
        let (app, store, _dir) = create_test_app().await;

        let now = Utc::now();
        let this_month = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .unwrap();
        let long_ago = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();

        store
            .write_batch(&[
                MetricPoint::new("fitbit.steps", long_ago).value(1.0),
                MetricPoint::new("fitbit.steps", this_month).value(2.0),
            ])
            .await
            .unwrap();

        let (status, body) = get(app, "/api/v1/dashboard").await;
        assert_eq!(status, StatusCode::OK);

        let dashboard: DashboardResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(dashboard.series.len(), 1);
        let steps = &dashboard.series[0];
        assert_eq!(steps.chart_name, "Steps");
        // The 2001 point falls outside the two-month window
        assert_eq!(steps.points.len(), 1);
        assert_eq!(steps.points[0].value, 2.0);
    }
}
