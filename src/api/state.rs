//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use crate::config::{Config, ReporterConfig};
use crate::series::Granularity;
use crate::storage::MetricStore;
use std::sync::Arc;
use std::time::Instant;

/// Chart settings for one configured metric
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    /// Full metric name, e.g. `fitbit.steps`
    pub name: String,
    pub chart_name: String,
    pub color: Option<String>,
    pub granularity: Granularity,
    /// Months of history to show
    pub lookback_months: u32,
}

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Metric store the series are read from
    pub store: Arc<dyn MetricStore>,
    /// Dashboard layout, in configuration order
    pub charts: Arc<Vec<ChartSpec>>,
    /// Reporter configuration
    pub config: Arc<ReporterConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn MetricStore>, charts: Vec<ChartSpec>, config: ReporterConfig) -> Self {
        Self {
            store,
            charts: Arc::new(charts),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Build state from the full application config
    pub fn from_config(store: Arc<dyn MetricStore>, config: &Config) -> Self {
        let charts = config
            .metric_entries()
            .map(|entry| ChartSpec {
                name: entry.full_name(),
                chart_name: entry
                    .settings
                    .chart_name
                    .clone()
                    .unwrap_or_else(|| entry.full_name()),
                color: entry.settings.color.clone(),
                granularity: entry.settings.granularity,
                lookback_months: entry.settings.chart_lookback,
            })
            .collect();

        Self::new(store, charts, config.reporter.clone())
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}
