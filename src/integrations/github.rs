//! GitHub Integration
//!
//! Counts `github.contributions` from the public events feed of a user.
//! Only event types that represent authored work are counted.

use super::http::{ApiClient, Auth};
use super::{CollectError, Collector};
use crate::config::GitHubConfig;
use crate::series::{generate_buckets, Aggregator, DecodeError, Granularity, MetricPoint, RawEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// The events API serves at most 300 events (10 pages of 30, or 3 of 100)
const MAX_PAGES: usize = 10;

pub(crate) const METRICS: &[&str] = &["contributions"];

/// Event types that count as a contribution
const CONTRIBUTION_EVENTS: &[&str] = &[
    "CommitCommentEvent",
    "CreateEvent",
    "RepositoryEvent",
    "IssuesEvent",
    "IssueCommentEvent",
    "PullRequestEvent",
    "PullRequestReviewEvent",
    "PullRequestReviewCommentEvent",
    "PushEvent",
];

/// GitHub API collector
pub struct GitHubCollector {
    client: ApiClient,
    config: GitHubConfig,
    api_base: String,
}

impl GitHubCollector {
    pub fn new(client: ApiClient, config: GitHubConfig) -> Self {
        Self::with_base_url(client, config, DEFAULT_API_BASE)
    }

    pub fn with_base_url(client: ApiClient, config: GitHubConfig, base: &str) -> Self {
        Self {
            client,
            config,
            api_base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch every page of the user's events, following `rel="next"`
    async fn fetch_events(&self, metric: &str) -> Result<Vec<GitHubEvent>, CollectError> {
        let mut url = format!(
            "{}/users/{}/events?page=1&per_page=100",
            self.api_base,
            urlencoding::encode(&self.config.username)
        );
        let mut events = Vec::new();

        for page in 1..=MAX_PAGES {
            let fetched = self
                .client
                .get_json::<Vec<GitHubEvent>>(&url, Auth::Bearer(&self.config.access_token))
                .await
                .map_err(|e| e.for_metric(metric))?;

            tracing::debug!(metric, page, events = fetched.body.len(), "Fetched GitHub events page");

            let empty = fetched.body.is_empty();
            events.extend(fetched.body);

            match fetched.next {
                Some(next) if !empty => url = next,
                _ => break,
            }
        }

        Ok(events)
    }
}

#[derive(Debug, Deserialize)]
struct GitHubEvent {
    #[serde(rename = "type")]
    event_type: String,
    created_at: String,
}

impl RawEvent for GitHubEvent {
    fn is_counted(&self) -> bool {
        CONTRIBUTION_EVENTS.contains(&self.event_type.as_str())
    }

    fn occurred_at(&self) -> Result<Option<DateTime<Utc>>, DecodeError> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| DecodeError::date("created_at", &self.created_at, e))
    }
}

#[async_trait]
impl Collector for GitHubCollector {
    fn source(&self) -> &'static str {
        "github"
    }

    fn metrics(&self) -> &'static [&'static str] {
        METRICS
    }

    async fn collect_range(
        &self,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<MetricPoint>, CollectError> {
        self.ensure_supported(metric)?;
        let name = format!("github.{}", metric);

        let buckets = generate_buckets(&name, start, end, granularity);
        let events = self.fetch_events(&name).await?;

        let mut points = buckets;
        let stats = Aggregator::count(granularity)
            .fill(&events, &mut points)
            .map_err(|e| CollectError::decoding(&name, e))?;

        tracing::info!(
            metric = %name,
            events = events.len(),
            counted = stats.matched,
            "Aggregated GitHub events"
        );
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(kind: &str, at: &str) -> GitHubEvent {
        GitHubEvent {
            event_type: kind.into(),
            created_at: at.into(),
        }
    }

    #[test]
    fn test_only_contribution_types_counted() {
        assert!(event("PushEvent", "2018-01-01T10:00:00Z").is_counted());
        assert!(event("PullRequestReviewEvent", "2018-01-01T10:00:00Z").is_counted());
        assert!(!event("WatchEvent", "2018-01-01T10:00:00Z").is_counted());
        assert!(!event("ForkEvent", "2018-01-01T10:00:00Z").is_counted());
    }

    #[test]
    fn test_daily_count() {
        let start = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2018, 1, 3, 0, 0, 0).unwrap();
        let events = vec![
            event("PushEvent", "2018-01-01T08:00:00Z"),
            event("IssuesEvent", "2018-01-01T23:59:59Z"),
            event("WatchEvent", "2018-01-02T12:00:00Z"),
            event("CreateEvent", "2018-01-03T00:00:00+02:00"),
        ];

        let points = Aggregator::count(Granularity::Day)
            .aggregate(&events, generate_buckets("github.contributions", start, end, Granularity::Day))
            .unwrap();

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        // 2018-01-03T00:00+02:00 is 2018-01-02T22:00Z
        assert_eq!(values, vec![2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_bad_timestamp_is_decode_error() {
        assert!(event("PushEvent", "yesterday").occurred_at().is_err());
    }
}
