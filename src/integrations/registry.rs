//! Source id → collector lookup

use super::http::ApiClient;
use super::{CollectError, Collector, FitbitCollector, GitHubCollector, GoodreadsCollector};
use crate::config::Config;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Collectors keyed by source id
#[derive(Default, Clone)]
pub struct CollectorRegistry {
    collectors: BTreeMap<&'static str, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collector for every source that has configured metrics
    ///
    /// Expects a config that already passed [`Config::validate`].
    pub fn from_config(config: &Config) -> Result<Self, CollectError> {
        let client = ApiClient::new(config.collector.request_timeout())?;
        let mut registry = Self::new();

        for (source, metrics) in &config.metrics {
            if metrics.is_empty() {
                continue;
            }

            let collector: Arc<dyn Collector> = match source.as_str() {
                "fitbit" => Arc::new(FitbitCollector::new(
                    client.clone(),
                    section(config.fitbit.as_ref(), "fitbit")?,
                )),
                "github" => Arc::new(GitHubCollector::new(
                    client.clone(),
                    section(config.github.as_ref(), "github")?,
                )),
                "goodreads" => Arc::new(GoodreadsCollector::new(
                    client.clone(),
                    section(config.goodreads.as_ref(), "goodreads")?,
                )),
                other => {
                    return Err(CollectError::Configuration(format!(
                        "unknown source {:?}",
                        other
                    )))
                }
            };
            registry.register(collector);
        }

        tracing::debug!(sources = ?registry.sources(), "Built collector registry");
        Ok(registry)
    }

    /// Add or replace the collector for its source id
    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        self.collectors.insert(collector.source(), collector);
    }

    pub fn get(&self, source: &str) -> Result<Arc<dyn Collector>, CollectError> {
        self.collectors
            .get(source)
            .cloned()
            .ok_or_else(|| CollectError::Configuration(format!("no collector for source {:?}", source)))
    }

    pub fn sources(&self) -> Vec<&'static str> {
        self.collectors.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

fn section<T: Clone>(section: Option<&T>, name: &str) -> Result<T, CollectError> {
    section
        .cloned()
        .ok_or_else(|| CollectError::Configuration(format!("missing [{}] section", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configured_sources_built() {
        let config = Config::parse(
            r#"
            [github]
            username = "octocat"
            access_token = "token"

            [goodreads]
            developer_key = "key"
            user_id = "42"

            [metrics.github.contributions]
            lookback = 30

            [metrics.goodreads.books_read]
            lookback = 12
            granularity = "month"
            "#,
        )
        .unwrap();

        let registry = CollectorRegistry::from_config(&config).unwrap();
        assert_eq!(registry.sources(), vec!["github", "goodreads"]);
        assert_eq!(registry.get("github").unwrap().metrics(), &["contributions"]);
        assert!(matches!(
            registry.get("fitbit"),
            Err(CollectError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_section_is_configuration_error() {
        let config = Config::parse(
            r#"
            [metrics.fitbit.steps]
            lookback = 12
            "#,
        )
        .unwrap();

        assert!(matches!(
            CollectorRegistry::from_config(&config),
            Err(CollectError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_metric_before_io() {
        let config = Config::parse(
            r#"
            [github]
            username = "octocat"
            access_token = "token"

            [metrics.github.contributions]
            lookback = 30
            "#,
        )
        .unwrap();

        let registry = CollectorRegistry::from_config(&config).unwrap();
        let github = registry.get("github").unwrap();
        let result = github
            .collect("stars", crate::series::Lookback::days(7), crate::series::Granularity::Day)
            .await;
        assert!(matches!(
            result,
            Err(CollectError::UnsupportedMetric { collector: "github", .. })
        ));
    }
}
