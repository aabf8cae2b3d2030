//! External Integrations
//!
//! Source collectors that turn an external API's raw records into a
//! finished, calendar-aligned series:
//! - Fitbit (daily step counts)
//! - GitHub (contribution events)
//! - Goodreads (books and pages read)
//!
//! ```text
//!   collect(metric, lookback, granularity)
//!     → window [end - lookback, now - 1 day]
//!     → generate_buckets
//!     → fetch raw events (paginated)
//!     → Aggregator::fill
//! ```
//!
//! The [`CollectorRegistry`] maps source ids to collectors and the
//! [`CollectionRunner`] fans collection out over tokio tasks.

mod fitbit;
mod github;
mod goodreads;
pub mod http;
mod registry;
mod runner;

pub use fitbit::{FitbitCollector, FitbitTokens};
pub use github::GitHubCollector;
pub use goodreads::GoodreadsCollector;
pub use registry::CollectorRegistry;
pub use runner::{
    CollectionJob, CollectionRunner, FailurePolicy, JobError, MetricFailure, MetricReport,
    RunError, RunSummary,
};

use crate::series::{DecodeError, Granularity, Lookback, MetricPoint};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// A source of one or more metrics
#[async_trait]
pub trait Collector: Send + Sync {
    /// Source id, the first half of every metric name it produces
    fn source(&self) -> &'static str;

    /// Metric names (without the source prefix) this collector supports
    fn metrics(&self) -> &'static [&'static str];

    /// Collect `metric` over the standard window ending yesterday
    async fn collect(
        &self,
        metric: &str,
        lookback: Lookback,
        granularity: Granularity,
    ) -> Result<Vec<MetricPoint>, CollectError> {
        let (start, end) = collection_window(Utc::now(), lookback);
        tracing::debug!(
            source = self.source(),
            metric,
            %lookback,
            start = %start.date_naive(),
            end = %end.date_naive(),
            "Computed collection window"
        );
        self.collect_range(metric, start, end, granularity).await
    }

    /// Collect `metric` over an explicit `[start, end]` range
    async fn collect_range(
        &self,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<MetricPoint>, CollectError>;

    /// Fail with `UnsupportedMetric` unless `metric` is provided here
    fn ensure_supported(&self, metric: &str) -> Result<(), CollectError> {
        if self.metrics().contains(&metric) {
            Ok(())
        } else {
            Err(CollectError::UnsupportedMetric {
                collector: self.source(),
                metric: metric.to_string(),
            })
        }
    }
}

/// Metrics a built-in source provides, `None` for an unknown source
pub fn supported_metrics(source: &str) -> Option<&'static [&'static str]> {
    match source {
        "fitbit" => Some(fitbit::METRICS),
        "github" => Some(github::METRICS),
        "goodreads" => Some(goodreads::METRICS),
        _ => None,
    }
}

/// The `[start, end]` range a collection run covers
///
/// `end` is one day before `now` because the current day (or month) is
/// still incomplete upstream.
pub fn collection_window(now: DateTime<Utc>, lookback: Lookback) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = now - Duration::days(1);
    (lookback.before(end), end)
}

/// Errors that can occur while collecting a metric
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("{collector} does not provide metric {metric:?}")]
    UnsupportedMetric {
        collector: &'static str,
        metric: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Collecting {metric} failed: {message}")]
    CollectionFailed { metric: String, message: String },

    #[error("Decoding {metric} failed: {message}")]
    DecodingFailed { metric: String, message: String },

    #[error("Collecting {metric} timed out after {secs}s")]
    Timeout { metric: String, secs: u64 },
}

impl CollectError {
    /// Wrap an aggregation decode failure for `metric`
    pub fn decoding(metric: &str, err: DecodeError) -> Self {
        CollectError::DecodingFailed {
            metric: metric.to_string(),
            message: err.to_string(),
        }
    }
}
