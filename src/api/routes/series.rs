//! Series Routes
//!
//! - GET /api/v1/metrics/:name?since=YYYY-MM-DD - One stored series
//! - GET /api/v1/dashboard - Every configured series, windowed for charting

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;

use crate::api::dto::{ChartSeries, DashboardResponse, PointDto, SeriesQuery, SeriesResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::series::{Granularity, Lookback};

/// GET /api/v1/metrics/:name
///
/// Points with `date > since`, oldest first. An unknown name is an empty
/// series, not an error.
pub async fn get_series(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<SeriesQuery>,
) -> ApiResult<Json<SeriesResponse>> {
    let since = query.since.as_deref().map(parse_since).transpose()?;

    let points = state
        .store
        .get_metric(&name, since.unwrap_or(DateTime::<Utc>::MIN_UTC))
        .await?;

    Ok(Json(SeriesResponse {
        name,
        since,
        points: points.into_iter().map(PointDto::from).collect(),
    }))
}

/// GET /api/v1/dashboard
pub async fn dashboard(State(state): State<Arc<AppState>>) -> ApiResult<Json<DashboardResponse>> {
    let now = Utc::now();
    let mut series = Vec::with_capacity(state.charts.len());

    for chart in state.charts.iter() {
        let from = chart_start(now, chart.lookback_months);
        // Exclusive bound just before the first bucket
        let since = chart_since(from);

        let points = state.store.get_metric(&chart.name, since).await?;
        if points.is_empty() {
            tracing::info!(metric = %chart.name, "No stored points, omitting from dashboard");
            continue;
        }

        series.push(ChartSeries {
            name: chart.name.clone(),
            chart_name: chart.chart_name.clone(),
            color: chart.color.clone(),
            granularity: chart.granularity,
            from,
            points: points.into_iter().map(PointDto::from).collect(),
        });
    }

    Ok(Json(DashboardResponse {
        generated_at: now,
        series,
    }))
}

/// First of the month `months` months before `now`
fn chart_start(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    Lookback::months(months).before(Granularity::Month.truncate(now))
}

/// Exclusive `since` that still includes a point dated `from`
fn chart_since(from: DateTime<Utc>) -> DateTime<Utc> {
    from.checked_sub_signed(Duration::nanoseconds(1))
        .unwrap_or(from)
}

/// Accept `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp
fn parse_since(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            ApiError::Validation(format!(
                "since must be YYYY-MM-DD or an RFC 3339 timestamp, got {:?}",
                raw
            ))
        })
}
