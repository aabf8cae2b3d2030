//! Fitbit Integration
//!
//! Collects `fitbit.steps` from the activity time series endpoint:
//!
//! ```text
//! GET {base}/activities/steps/date/{start}/{end}.json
//! {"activities-steps": [{"dateTime": "2018-01-01", "value": "8042"}, ...]}
//! ```
//!
//! OAuth tokens live in a JSON cache file. An expired access token is
//! refreshed with the client credentials and the cache rewritten.

use super::http::{ApiClient, Auth, FetchError};
use super::{CollectError, Collector};
use crate::config::FitbitConfig;
use crate::series::{
    generate_buckets, parse_number, Aggregator, DecodeError, Granularity, MetricPoint, RawEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

const DEFAULT_API_BASE: &str = "https://api.fitbit.com/1/user/-";
const DEFAULT_TOKEN_URL: &str = "https://api.fitbit.com/oauth2/token";

pub(crate) const METRICS: &[&str] = &["steps"];

/// OAuth tokens as stored in the cache file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FitbitTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl FitbitTokens {
    /// Refresh a little early so a token doesn't expire mid-request
    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now + Duration::minutes(5)
    }
}

/// Fitbit API collector
pub struct FitbitCollector {
    client: ApiClient,
    config: FitbitConfig,
    api_base: String,
    token_url: String,
    tokens: Mutex<Option<FitbitTokens>>,
}

impl FitbitCollector {
    /// Create a collector against the public Fitbit API
    pub fn new(client: ApiClient, config: FitbitConfig) -> Self {
        Self {
            client,
            config,
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            tokens: Mutex::new(None),
        }
    }

    /// Point the collector at another server (`{base}/activities/...`,
    /// `{base}/oauth2/token`)
    pub fn with_base_url(client: ApiClient, config: FitbitConfig, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            api_base: base.to_string(),
            token_url: format!("{}/oauth2/token", base),
            ..Self::new(client, config)
        }
    }

    fn cache_file(&self) -> &PathBuf {
        &self.config.cache_file
    }

    /// Current access token, loading and refreshing the cache as needed
    async fn access_token(&self, metric: &str) -> Result<String, CollectError> {
        let mut guard = self.tokens.lock().await;

        let tokens = match guard.take() {
            Some(tokens) => tokens,
            None => self.load_tokens().await?,
        };

        let tokens = if tokens.needs_refresh(Utc::now()) {
            tracing::info!(cache = %self.cache_file().display(), "Refreshing Fitbit access token");
            let refreshed = self.refresh(&tokens, metric).await?;
            self.store_tokens(&refreshed).await?;
            refreshed
        } else {
            tokens
        };

        let access = tokens.access_token.clone();
        *guard = Some(tokens);
        Ok(access)
    }

    async fn load_tokens(&self) -> Result<FitbitTokens, CollectError> {
        let path = self.cache_file();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            CollectError::Configuration(format!(
                "Fitbit token cache {} unreadable: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&raw).map_err(|e| {
            CollectError::Configuration(format!(
                "Fitbit token cache {} malformed: {}",
                path.display(),
                e
            ))
        })
    }

    async fn store_tokens(&self, tokens: &FitbitTokens) -> Result<(), CollectError> {
        let path = self.cache_file();
        let json = serde_json::to_string_pretty(tokens)
            .map_err(|e| CollectError::Configuration(format!("Fitbit token cache: {}", e)))?;

        tokio::fs::write(path, json).await.map_err(|e| {
            CollectError::Configuration(format!(
                "Fitbit token cache {} not writable: {}",
                path.display(),
                e
            ))
        })
    }

    async fn refresh(&self, tokens: &FitbitTokens, metric: &str) -> Result<FitbitTokens, CollectError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            refresh_token: String,
            expires_in: i64,
        }

        let response = self
            .client
            .inner()
            .post(&self.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                FetchError::Transport {
                    url: self.token_url.clone(),
                    message: e.to_string(),
                }
                .for_metric(metric)
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: self.token_url.clone(),
                status: response.status(),
            }
            .for_metric(metric));
        }

        let body = response.text().await.map_err(|e| {
            FetchError::Transport {
                url: self.token_url.clone(),
                message: e.to_string(),
            }
            .for_metric(metric)
        })?;
        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            FetchError::Decode {
                url: self.token_url.clone(),
                message: e.to_string(),
            }
            .for_metric(metric)
        })?;

        Ok(FitbitTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }

    async fn fetch_steps(
        &self,
        metric: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<StepsEntry>, CollectError> {
        let token = self.access_token(metric).await?;
        let url = format!(
            "{}/activities/steps/date/{}/{}.json",
            self.api_base,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );

        let fetched = self
            .client
            .get_json::<StepsResponse>(&url, Auth::Bearer(&token))
            .await
            .map_err(|e| e.for_metric(metric))?;

        Ok(fetched.body.steps)
    }
}

#[derive(Debug, Deserialize)]
struct StepsResponse {
    #[serde(rename = "activities-steps", default)]
    steps: Vec<StepsEntry>,
}

/// One day of the steps time series
#[derive(Debug, Deserialize)]
struct StepsEntry {
    #[serde(rename = "dateTime")]
    date_time: String,
    value: String,
}

impl RawEvent for StepsEntry {
    fn occurred_at(&self) -> Result<Option<DateTime<Utc>>, DecodeError> {
        let date = NaiveDate::parse_from_str(&self.date_time, "%Y-%m-%d")
            .map_err(|e| DecodeError::date("dateTime", &self.date_time, e))?;
        Ok(Some(date.and_time(chrono::NaiveTime::MIN).and_utc()))
    }

    fn amount(&self) -> Result<Option<f64>, DecodeError> {
        parse_number("value", &self.value).map(Some)
    }
}

#[async_trait]
impl Collector for FitbitCollector {
    fn source(&self) -> &'static str {
        "fitbit"
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
        let name = format!("fitbit.{}", metric);

        let buckets = generate_buckets(&name, start, end, granularity);
        let entries = self
            .fetch_steps(&name, start.date_naive(), end.date_naive())
            .await?;

        tracing::info!(metric = %name, events = entries.len(), "Fetched Fitbit steps");

        Aggregator::sum(granularity)
            .aggregate(&entries, buckets)
            .map_err(|e| CollectError::decoding(&name, e))
    }
}
