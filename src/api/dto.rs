//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use crate::series::{Granularity, MetricPoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// SERIES DTOs
// ============================================

/// Query string for `GET /api/v1/metrics/:name`
#[derive(Debug, Default, Deserialize)]
pub struct SeriesQuery {
    /// Exclusive lower bound, `YYYY-MM-DD` or RFC 3339; omitted means everything
    #[serde(default)]
    pub since: Option<String>,
}

/// One point of a series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointDto {
    pub date: DateTime<Utc>,
    pub value: f64,
}

impl From<MetricPoint> for PointDto {
    fn from(point: MetricPoint) -> Self {
        Self {
            date: point.date,
            value: point.value,
        }
    }
}

/// A stored series
#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesResponse {
    pub name: String,
    pub since: Option<DateTime<Utc>>,
    pub points: Vec<PointDto>,
}

// ============================================
// DASHBOARD DTOs
// ============================================

/// A series prepared for charting
#[derive(Debug, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub chart_name: String,
    pub color: Option<String>,
    pub granularity: Granularity,
    /// First bucket date shown
    pub from: DateTime<Utc>,
    pub points: Vec<PointDto>,
}

/// Every configured series that has data
#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardResponse {
    pub generated_at: DateTime<Utc>,
    pub series: Vec<ChartSeries>,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub backend: String,
    pub uptime_seconds: u64,
    pub version: String,
}
