//! Concurrent collection runs
//!
//! One tokio task per source, and inside it one task per metric. Each metric
//! task collects its series and writes it through the shared store. The
//! runner returns only once every task has finished or been aborted.
//!
//! ```text
//! run(jobs)
//!  ├─ fitbit ──── steps
//!  ├─ github ──── contributions
//!  └─ goodreads ─┬ books_read
//!                └ pages_read
//! ```

use super::{CollectError, Collector, CollectorRegistry};
use crate::config::Config;
use crate::series::{Granularity, Lookback};
use crate::storage::{MetricStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// What a failed metric does to the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// First failure cancels all outstanding work and fails the run
    #[default]
    Abort,
    /// Failures are recorded and every other metric still runs
    Isolate,
}

/// One metric to collect
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionJob {
    pub source: String,
    pub metric: String,
    pub lookback: Lookback,
    pub granularity: Granularity,
}

impl CollectionJob {
    pub fn new(
        source: impl Into<String>,
        metric: impl Into<String>,
        lookback: Lookback,
        granularity: Granularity,
    ) -> Self {
        Self {
            source: source.into(),
            metric: metric.into(),
            lookback,
            granularity,
        }
    }

    /// `<source>.<metric>`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.source, self.metric)
    }

    /// Jobs for every configured metric, optionally narrowed to one source
    /// and/or one metric name
    pub fn from_config(config: &Config, source: Option<&str>, metric: Option<&str>) -> Vec<Self> {
        config
            .metric_entries()
            .filter(|entry| source.map_or(true, |s| entry.source == s))
            .filter(|entry| {
                metric.map_or(true, |m| entry.metric == m || entry.full_name() == m)
            })
            .map(|entry| {
                Self::new(
                    entry.source,
                    entry.metric,
                    entry.settings.lookback(),
                    entry.settings.granularity,
                )
            })
            .collect()
    }
}

/// Why a single metric failed
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error("writing points failed: {0}")]
    Storage(#[from] StorageError),

    #[error("task failed: {0}")]
    Task(String),
}

/// The failure that stopped a run under [`FailurePolicy::Abort`]
#[derive(Debug, thiserror::Error)]
#[error("collection of {metric} failed: {error}")]
pub struct RunError {
    pub metric: String,
    #[source]
    pub error: JobError,
}

/// A metric that was collected and written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    pub metric: String,
    pub points: usize,
}

/// A metric that failed under [`FailurePolicy::Isolate`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricFailure {
    pub metric: String,
    pub error: String,
}

/// Outcome of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub succeeded: Vec<MetricReport>,
    pub failed: Vec<MetricFailure>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn points_written(&self) -> usize {
        self.succeeded.iter().map(|r| r.points).sum()
    }

    fn sort(&mut self) {
        self.succeeded.sort_by(|a, b| a.metric.cmp(&b.metric));
        self.failed.sort_by(|a, b| a.metric.cmp(&b.metric));
    }
}

/// Per-source task result
#[derive(Default)]
struct SourceOutcome {
    succeeded: Vec<MetricReport>,
    failed: Vec<(String, JobError)>,
}

/// Runs collection jobs concurrently and writes their points
pub struct CollectionRunner {
    registry: Arc<CollectorRegistry>,
    store: Arc<dyn MetricStore>,
    policy: FailurePolicy,
    timeout: Duration,
}

impl CollectionRunner {
    pub fn new(registry: Arc<CollectorRegistry>, store: Arc<dyn MetricStore>) -> Self {
        Self {
            registry,
            store,
            policy: FailurePolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Upper bound for collecting one metric
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Collect and store every job
    ///
    /// Under [`FailurePolicy::Abort`] the first failure cancels the rest and
    /// is returned as the error. Under [`FailurePolicy::Isolate`] the
    /// summary lists each failure alongside the successes.
    pub async fn run(&self, jobs: Vec<CollectionJob>) -> Result<RunSummary, RunError> {
        let mut by_source: BTreeMap<String, Vec<CollectionJob>> = BTreeMap::new();
        for job in jobs {
            by_source.entry(job.source.clone()).or_default().push(job);
        }

        tracing::info!(
            sources = by_source.len(),
            policy = ?self.policy,
            "Starting collection run"
        );

        let mut sources = JoinSet::new();
        for (source, jobs) in by_source {
            let collector = self.registry.get(&source);
            let store = Arc::clone(&self.store);
            let policy = self.policy;
            let timeout = self.timeout;

            sources.spawn(async move {
                let outcome = match collector {
                    Ok(collector) => run_source(collector, jobs, store, policy, timeout).await,
                    Err(e) => {
                        let mut outcome = SourceOutcome::default();
                        let message = e.to_string();
                        for job in jobs {
                            outcome.failed.push((
                                job.full_name(),
                                JobError::Collect(CollectError::Configuration(message.clone())),
                            ));
                        }
                        outcome
                    }
                };
                (source, outcome)
            });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = sources.join_next().await {
            let (source, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    let failure = ("<source task>".to_string(), JobError::Task(e.to_string()));
                    (String::new(), SourceOutcome {
                        succeeded: Vec::new(),
                        failed: vec![failure],
                    })
                }
            };

            summary.succeeded.extend(outcome.succeeded);

            for (metric, error) in outcome.failed {
                if self.policy == FailurePolicy::Abort {
                    tracing::error!(%metric, %source, error = %error, "Aborting collection run");
                    sources.shutdown().await;
                    return Err(RunError { metric, error });
                }
                summary.failed.push(MetricFailure {
                    metric,
                    error: error.to_string(),
                });
            }
        }

        summary.sort();
        tracing::info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            points = summary.points_written(),
            "Collection run finished"
        );
        Ok(summary)
    }
}

/// Collect all metrics of one source concurrently
async fn run_source(
    collector: Arc<dyn Collector>,
    jobs: Vec<CollectionJob>,
    store: Arc<dyn MetricStore>,
    policy: FailurePolicy,
    timeout: Duration,
) -> SourceOutcome {
    let mut metrics = JoinSet::new();
    for job in jobs {
        let collector = Arc::clone(&collector);
        let store = Arc::clone(&store);
        metrics.spawn(async move {
            let name = job.full_name();
            let result = run_metric(collector.as_ref(), &job, store.as_ref(), timeout).await;
            (name, result)
        });
    }

    let mut outcome = SourceOutcome::default();
    while let Some(joined) = metrics.join_next().await {
        match joined {
            Ok((metric, Ok(points))) => {
                tracing::info!(%metric, points, "Collected metric");
                outcome.succeeded.push(MetricReport { metric, points });
            }
            Ok((metric, Err(error))) => {
                tracing::warn!(%metric, error = %error, "Metric collection failed");
                outcome.failed.push((metric, error));
                if policy == FailurePolicy::Abort {
                    // Cancel the remaining metric tasks
                    metrics.shutdown().await;
                    break;
                }
            }
            Err(e) => {
                let metric = format!("{}.<task>", collector.source());
                outcome.failed.push((metric, JobError::Task(e.to_string())));
                if policy == FailurePolicy::Abort {
                    metrics.shutdown().await;
                    break;
                }
            }
        }
    }
    outcome
}

/// Collect one metric and write its points
async fn run_metric(
    collector: &dyn Collector,
    job: &CollectionJob,
    store: &dyn MetricStore,
    timeout: Duration,
) -> Result<usize, JobError> {
    let points = tokio::time::timeout(
        timeout,
        collector.collect(&job.metric, job.lookback, job.granularity),
    )
    .await
    .map_err(|_| CollectError::Timeout {
        metric: job.full_name(),
        secs: timeout.as_secs(),
    })??;

    Ok(store.write_batch(&points).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{generate_buckets, MetricPoint};
    use crate::storage::{LogStore, SyncMode};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tempfile::tempdir;

    /// Collector whose metrics either succeed, fail or hang
    struct FakeCollector {
        source: &'static str,
        metrics: &'static [&'static str],
    }

    #[async_trait]
    impl Collector for FakeCollector {
        fn source(&self) -> &'static str {
            self.source
        }

        fn metrics(&self) -> &'static [&'static str] {
            self.metrics
        }

        async fn collect_range(
            &self,
            metric: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            granularity: Granularity,
        ) -> Result<Vec<MetricPoint>, CollectError> {
            self.ensure_supported(metric)?;
            let name = format!("{}.{}", self.source, metric);
            match metric {
                "broken" => Err(CollectError::CollectionFailed {
                    metric: name,
                    message: "connection refused".into(),
                }),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
                _ => Ok(generate_buckets(&name, start, end, granularity)
                    .into_iter()
                    .map(|p| p.value(1.0))
                    .collect()),
            }
        }
    }

    fn registry() -> Arc<CollectorRegistry> {
        let mut registry = CollectorRegistry::new();
        registry.register(Arc::new(FakeCollector {
            source: "alpha",
            metrics: &["one", "two", "broken", "slow"],
        }));
        registry.register(Arc::new(FakeCollector {
            source: "beta",
            metrics: &["three"],
        }));
        Arc::new(registry)
    }

    fn job(source: &str, metric: &str) -> CollectionJob {
        CollectionJob::new(source, metric, Lookback::days(2), Granularity::Day)
    }

    #[tokio::test]
    async fn test_all_jobs_written() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn MetricStore> =
            Arc::new(LogStore::open(dir.path().join("m.log"), SyncMode::None).unwrap());

        let summary = CollectionRunner::new(registry(), Arc::clone(&store))
            .run(vec![job("alpha", "one"), job("alpha", "two"), job("beta", "three")])
            .await
            .unwrap();

        assert!(summary.is_clean());
        let names: Vec<&str> = summary.succeeded.iter().map(|r| r.metric.as_str()).collect();
        assert_eq!(names, vec!["alpha.one", "alpha.two", "beta.three"]);
        // Lookback of 2 days ending yesterday spans 3 daily buckets
        assert_eq!(summary.points_written(), 9);

        let stored = store
            .get_metric("beta.three", DateTime::<Utc>::MIN_UTC)
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn test_abort_policy_fails_run() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn MetricStore> =
            Arc::new(LogStore::open(dir.path().join("m.log"), SyncMode::None).unwrap());

        let err = CollectionRunner::new(registry(), store)
            .policy(FailurePolicy::Abort)
            .run(vec![job("alpha", "broken"), job("alpha", "slow")])
            .await
            .unwrap_err();

        assert_eq!(err.metric, "alpha.broken");
        assert!(matches!(
            err.error,
            JobError::Collect(CollectError::CollectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_isolate_policy_reports_failures() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn MetricStore> =
            Arc::new(LogStore::open(dir.path().join("m.log"), SyncMode::None).unwrap());

        let summary = CollectionRunner::new(registry(), store)
            .policy(FailurePolicy::Isolate)
            .run(vec![
                job("alpha", "one"),
                job("alpha", "broken"),
                job("alpha", "unknown"),
                job("gamma", "anything"),
                job("beta", "three"),
            ])
            .await
            .unwrap();

        let ok: Vec<&str> = summary.succeeded.iter().map(|r| r.metric.as_str()).collect();
        assert_eq!(ok, vec!["alpha.one", "beta.three"]);

        let failed: Vec<&str> = summary.failed.iter().map(|f| f.metric.as_str()).collect();
        assert_eq!(failed, vec!["alpha.broken", "alpha.unknown", "gamma.anything"]);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn MetricStore> =
            Arc::new(LogStore::open(dir.path().join("m.log"), SyncMode::None).unwrap());

        let summary = CollectionRunner::new(registry(), store)
            .policy(FailurePolicy::Isolate)
            .timeout(Duration::from_millis(50))
            .run(vec![job("alpha", "slow")])
            .await
            .unwrap();

        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_closed_store_fails_metric() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn MetricStore> =
            Arc::new(LogStore::open(dir.path().join("m.log"), SyncMode::None).unwrap());
        store.close().await.unwrap();

        let err = CollectionRunner::new(registry(), store)
            .run(vec![job("beta", "three")])
            .await
            .unwrap_err();
        assert!(matches!(err.error, JobError::Storage(StorageError::Closed)));
    }

    #[test]
    fn test_jobs_from_config() {
        let config = Config::parse(
            r#"
            [metrics.github.contributions]
            lookback = 90

            [metrics.goodreads.books_read]
            lookback = 2
            lookback_unit = "month"
            granularity = "month"

            [metrics.goodreads.pages_read]
            lookback = 2
            granularity = "month"
            "#,
        )
        .unwrap();

        assert_eq!(CollectionJob::from_config(&config, None, None).len(), 3);

        let goodreads = CollectionJob::from_config(&config, Some("goodreads"), None);
        assert_eq!(goodreads.len(), 2);
        assert_eq!(goodreads[0].lookback, Lookback::months(2));

        let single = CollectionJob::from_config(&config, None, Some("goodreads.pages_read"));
        assert_eq!(single, vec![job_months("goodreads", "pages_read")]);
    }

    fn job_months(source: &str, metric: &str) -> CollectionJob {
        CollectionJob::new(source, metric, Lookback::months(2), Granularity::Month)
    }
}
