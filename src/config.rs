//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.
//!
//! Everything a collector needs (credentials, token cache paths, per-metric
//! lookback and granularity) is read here once and handed to constructors
//! explicitly.

use crate::integrations::{supported_metrics, FailurePolicy};
use crate::series::{Granularity, Lookback};
use crate::storage::{StorageBackend, SyncMode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub collector: CollectorConfig,

    pub fitbit: Option<FitbitConfig>,

    pub github: Option<GitHubConfig>,

    pub goodreads: Option<GoodreadsConfig>,

    /// `[metrics.<source>.<metric>]` tables
    #[serde(default)]
    pub metrics: BTreeMap<String, BTreeMap<String, MetricConfig>>,

    #[serde(default)]
    pub reporter: ReporterConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metric store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub backend: StorageBackend,

    /// Only used by the log backend
    #[serde(default)]
    pub sync: SyncMode,
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("statboard").join("statboard.db"))
        .unwrap_or_else(|| PathBuf::from("./statboard_data/statboard.db"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            backend: StorageBackend::default(),
            sync: SyncMode::default(),
        }
    }
}

/// Collection run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

impl CollectorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Fitbit credentials
#[derive(Debug, Clone, Deserialize)]
pub struct FitbitConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// JSON file holding the OAuth tokens, rewritten on refresh
    #[serde(default = "default_fitbit_cache")]
    pub cache_file: PathBuf,
}

fn default_fitbit_cache() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("statboard").join("fitbit_token.json"))
        .unwrap_or_else(|| PathBuf::from("./fitbit_token.json"))
}

/// GitHub credentials
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub access_token: String,
}

/// Goodreads credentials
#[derive(Debug, Clone, Deserialize)]
pub struct GoodreadsConfig {
    #[serde(default)]
    pub developer_key: String,
    #[serde(default)]
    pub user_id: String,
}

/// Per-metric collection and chart settings
#[derive(Debug, Clone, Deserialize)]
pub struct MetricConfig {
    /// How many lookback units before yesterday to collect
    #[serde(default = "default_lookback")]
    pub lookback: u32,

    /// Unit of `lookback`; defaults to the bucket granularity
    pub lookback_unit: Option<Granularity>,

    #[serde(default)]
    pub granularity: Granularity,

    pub chart_name: Option<String>,

    pub color: Option<String>,

    /// Months of history shown on the dashboard
    #[serde(default = "default_chart_lookback")]
    pub chart_lookback: u32,
}

fn default_lookback() -> u32 {
    30
}

fn default_chart_lookback() -> u32 {
    12
}

impl MetricConfig {
    pub fn lookback(&self) -> Lookback {
        Lookback {
            amount: self.lookback,
            unit: self.lookback_unit.unwrap_or(self.granularity),
        }
    }
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            lookback_unit: None,
            granularity: Granularity::default(),
            chart_name: None,
            color: None,
            chart_lookback: default_chart_lookback(),
        }
    }
}

/// Reporter (read API) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReporterConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8086
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// One configured metric, flattened out of the `[metrics]` tree
#[derive(Debug, Clone)]
pub struct MetricEntry<'a> {
    pub source: &'a str,
    pub metric: &'a str,
    pub settings: &'a MetricConfig,
}

impl MetricEntry<'_> {
    /// Full dot-namespaced name, e.g. `fitbit.steps`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.source, self.metric)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let mut config = Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        config.expand_home_paths();
        Ok(config)
    }

    /// Resolve a leading `~/` in file paths against the home directory
    fn expand_home_paths(&mut self) {
        self.storage.path = expand_home(&self.storage.path);
        if let Some(fitbit) = self.fitbit.as_mut() {
            fitbit.cache_file = expand_home(&fitbit.cache_file);
        }
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    ///
    /// Searches `~/.config/statboard/config.toml`, then `./statboard.toml`.
    /// A file that exists but fails to load is an error, not a fallback.
    pub fn load_default() -> Result<Self, ConfigError> {
        let candidates: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("statboard").join("config.toml")),
            Some(PathBuf::from("./statboard.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&candidates)
    }

    /// Load the first existing file of `candidates`
    fn load_first(candidates: &[PathBuf]) -> Result<Self, ConfigError> {
        for path in candidates {
            if path.exists() {
                let config = Self::load_with_env(path)?;
                tracing::info!("Loaded config from {:?}", path);
                return Ok(config);
            }
        }

        tracing::info!("Using default config with environment overrides");
        Ok(Self::from_env())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STATBOARD_DB_PATH") {
            self.storage.path = PathBuf::from(path);
        }

        if let Ok(port) = std::env::var("STATBOARD_REPORTER_PORT") {
            if let Ok(p) = port.parse() {
                self.reporter.port = p;
            }
        }

        if let Ok(level) = std::env::var("STATBOARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("STATBOARD_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Every configured metric, ordered by source then metric
    pub fn metric_entries(&self) -> impl Iterator<Item = MetricEntry<'_>> {
        self.metrics.iter().flat_map(|(source, metrics)| {
            metrics.iter().map(move |(metric, settings)| MetricEntry {
                source: source.as_str(),
                metric: metric.as_str(),
                settings,
            })
        })
    }

    /// Look up settings for a full metric name
    pub fn metric(&self, full_name: &str) -> Option<&MetricConfig> {
        let (source, metric) = full_name.split_once('.')?;
        self.metrics.get(source)?.get(metric)
    }

    /// Check that every source with configured metrics has its credentials
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "collector.request_timeout_secs must be greater than zero".into(),
            ));
        }

        for (source, metrics) in &self.metrics {
            if metrics.is_empty() {
                continue;
            }

            match source.as_str() {
                "fitbit" => {
                    let fitbit = self.fitbit.as_ref().ok_or(ConfigError::MissingSection("fitbit"))?;
                    require("fitbit", "client_id", &fitbit.client_id)?;
                    require("fitbit", "client_secret", &fitbit.client_secret)?;
                    if fitbit.cache_file.as_os_str().is_empty() {
                        return Err(ConfigError::MissingField {
                            section: "fitbit",
                            field: "cache_file",
                        });
                    }
                }
                "github" => {
                    let github = self.github.as_ref().ok_or(ConfigError::MissingSection("github"))?;
                    require("github", "username", &github.username)?;
                    require("github", "access_token", &github.access_token)?;
                }
                "goodreads" => {
                    let goodreads = self
                        .goodreads
                        .as_ref()
                        .ok_or(ConfigError::MissingSection("goodreads"))?;
                    require("goodreads", "developer_key", &goodreads.developer_key)?;
                    require("goodreads", "user_id", &goodreads.user_id)?;
                }
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "metrics configured for unknown source {:?}",
                        other
                    )))
                }
            }

            let supported = supported_metrics(source).unwrap_or_default();
            for (metric, settings) in metrics {
                if !supported.contains(&metric.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "{} does not provide metric {:?} (supported: {})",
                        source,
                        metric,
                        supported.join(", ")
                    )));
                }
                check_windows(source, metric, settings)?;
            }
        }

        Ok(())
    }
}

const MAX_LOOKBACK_DAYS: u32 = 36_600;
const MAX_LOOKBACK_MONTHS: u32 = 1_200;

/// Reject windows too wide to bucket
fn check_windows(source: &str, metric: &str, settings: &MetricConfig) -> Result<(), ConfigError> {
    let lookback = settings.lookback();
    let max = match lookback.unit {
        Granularity::Day => MAX_LOOKBACK_DAYS,
        Granularity::Month => MAX_LOOKBACK_MONTHS,
    };
    if lookback.amount > max {
        return Err(ConfigError::Invalid(format!(
            "metrics.{}.{}.lookback is {}, at most {} {}s allowed",
            source, metric, lookback.amount, max, lookback.unit
        )));
    }

    if settings.chart_lookback > MAX_LOOKBACK_MONTHS {
        return Err(ConfigError::Invalid(format!(
            "metrics.{}.{}.chart_lookback is {}, at most {} months allowed",
            source, metric, settings.chart_lookback, MAX_LOOKBACK_MONTHS
        )));
    }
    Ok(())
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn require(section: &'static str, field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingField { section, field })
    } else {
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Missing [{0}] section for configured metrics")]
    MissingSection(&'static str),

    #[error("Missing required field {section}.{field}")]
    MissingField {
        section: &'static str,
        field: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r##"# Statboard Configuration
#
# Environment variables override these settings:
# - STATBOARD_DB_PATH
# - STATBOARD_REPORTER_PORT
# - STATBOARD_LOG_LEVEL
# - STATBOARD_LOG_FORMAT

[storage]
# Metric store file
path = "~/.local/share/statboard/statboard.db"

# Store backend: sqlite (partitioned by metric) or log (single ordered keyspace)
backend = "sqlite"

# Log backend only: every_write, batched or none
sync = "batched"

[collector]
# What a failed metric does to the run: abort (stop everything) or isolate
failure_policy = "abort"

# Upper bound for one metric's collection (seconds)
request_timeout_secs = 30

[fitbit]
# OAuth client credentials (get from dev.fitbit.com)
client_id = ""
client_secret = ""

# Token cache: {"access_token": "...", "refresh_token": "...", "expires_at": "..."}
cache_file = "~/.config/statboard/fitbit_token.json"

[github]
username = ""
# Personal access token
access_token = ""

[goodreads]
developer_key = ""
user_id = ""

# One table per collected metric.
# lookback: units before yesterday to collect (unit = lookback_unit, else granularity)
# granularity: day or month
[metrics.fitbit.steps]
lookback = 12
granularity = "month"
chart_name = "Steps"
color = "#1f77b4"
chart_lookback = 12

[metrics.github.contributions]
lookback = 90
granularity = "day"
chart_name = "GitHub contributions"
color = "#2ca02c"
chart_lookback = 3

[metrics.goodreads.books_read]
lookback = 24
granularity = "month"
chart_name = "Books read"
color = "#ff7f0e"

[metrics.goodreads.pages_read]
lookback = 24
granularity = "month"
chart_name = "Pages read"
color = "#d62728"

[reporter]
host = "127.0.0.1"
port = 8086

# Allowed CORS origins
cors_origins = []

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"##
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::parse(&generate_default_config()).unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.collector.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.metric_entries().count(), 4);

        let steps = config.metric("fitbit.steps").unwrap();
        assert_eq!(steps.granularity, Granularity::Month);
        assert_eq!(steps.lookback(), Lookback::months(12));
    }

    #[test]
    fn test_default_config_fails_validation_without_credentials() {
        let config = Config::parse(&generate_default_config()).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField {
                section: "fitbit",
                field: "client_id"
            })
        ));
    }

    #[test]
    fn test_lookback_unit_overrides_granularity() {
        let config = Config::parse(
            r#"
            [github]
            username = "octocat"
            access_token = "token"

            [metrics.github.contributions]
            lookback = 3
            lookback_unit = "month"
            granularity = "day"
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        let settings = config.metric("github.contributions").unwrap();
        assert_eq!(settings.lookback(), Lookback::months(3));
        assert_eq!(settings.granularity, Granularity::Day);
    }

    #[test]
    fn test_missing_section_is_reported() {
        let config = Config::parse(
            r#"
            [metrics.goodreads.pages_read]
            lookback = 6
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSection("goodreads"))
        ));
    }

    #[test]
    fn test_unknown_granularity_rejected() {
        let result = Config::parse(
            r#"
            [metrics.fitbit.steps]
            granularity = "hour"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_source_rejected() {
        let config = Config::parse(
            r#"
            [metrics.strava.distance]
            lookback = 6
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unsupported_metric_fails_validation() {
        let config = Config::parse(
            r#"
            [github]
            username = "octocat"
            access_token = "token"

            [metrics.github.stars]
            lookback = 6
            "#,
        )
        .unwrap();

        match config.validate() {
            Err(ConfigError::Invalid(message)) => {
                assert!(message.contains("stars"), "{}", message);
                assert!(message.contains("contributions"), "{}", message);
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_windows_fail_validation() {
        let base = r#"
            [github]
            username = "octocat"
            access_token = "token"
        "#;

        let config = Config::parse(&format!(
            "{}\n[metrics.github.contributions]\ngranularity = \"day\"\nlookback = 4000000000\n",
            base
        ))
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config::parse(&format!(
            "{}\n[metrics.github.contributions]\nchart_lookback = 100000\n",
            base
        ))
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config::parse(&format!(
            "{}\n[metrics.github.contributions]\ngranularity = \"month\"\nlookback = 120\n",
            base
        ))
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_unparsable_default_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.toml");
        let broken = dir.path().join("statboard.toml");
        std::fs::write(
            &broken,
            "[metrics.fitbit.steps]\ngranularity = \"hour\"\n",
        )
        .unwrap();

        let result = Config::load_first(&[missing, broken]);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_first_existing_default_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        std::fs::write(&first, "[metrics.github.contributions]\nlookback = 3\n").unwrap();
        std::fs::write(&second, "not = [valid").unwrap();

        let config = Config::load_first(&[dir.path().join("absent.toml"), first, second]).unwrap();
        assert_eq!(config.metric("github.contributions").unwrap().lookback, 3);
    }

    #[test]
    fn test_expand_home() {
        let plain = PathBuf::from("/var/lib/statboard.db");
        assert_eq!(expand_home(&plain), plain);

        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home(Path::new("~/statboard.db")),
                home.join("statboard.db")
            );
        }
    }

    #[test]
    fn test_sections_without_metrics_need_no_credentials() {
        let config = Config::parse(
            r#"
            [github]
            username = ""
            "#,
        )
        .unwrap();
        config.validate().unwrap();
    }
}
