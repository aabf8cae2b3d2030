//! Goodreads Integration
//!
//! Reads the user's `read` shelf as XML and derives two metrics from it:
//! - `goodreads.books_read`: number of books finished per bucket
//! - `goodreads.pages_read`: pages of those books summed per bucket
//!
//! Reviews without a `read_at` date are ignored, and reviews without a page
//! count do not contribute to `pages_read`.

use super::http::{ApiClient, Auth};
use super::{CollectError, Collector};
use crate::config::GoodreadsConfig;
use crate::series::{
    generate_buckets, parse_number, Aggregator, DecodeError, Granularity, MetricPoint, RawEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

const DEFAULT_API_BASE: &str = "https://www.goodreads.com";

const PER_PAGE: u32 = 200;
const MAX_PAGES: u32 = 50;

pub(crate) const METRICS: &[&str] = &["books_read", "pages_read"];

/// `read_at` layout, e.g. `Mon Jan 02 15:04:05 -0700 2006`
const READ_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Goodreads API collector
pub struct GoodreadsCollector {
    client: ApiClient,
    config: GoodreadsConfig,
    api_base: String,
}

impl GoodreadsCollector {
    pub fn new(client: ApiClient, config: GoodreadsConfig) -> Self {
        Self::with_base_url(client, config, DEFAULT_API_BASE)
    }

    pub fn with_base_url(client: ApiClient, config: GoodreadsConfig, base: &str) -> Self {
        Self {
            client,
            config,
            api_base: base.trim_end_matches('/').to_string(),
        }
    }

    fn page_url(&self, page: u32) -> String {
        format!(
            "{}/review/list/{}.xml?key={}&v=2&shelf=read&per_page={}&page={}",
            self.api_base,
            urlencoding::encode(&self.config.user_id),
            urlencoding::encode(&self.config.developer_key),
            PER_PAGE,
            page
        )
    }

    /// Fetch the whole `read` shelf
    async fn fetch_reviews(&self, metric: &str) -> Result<Vec<Review>, CollectError> {
        let mut reviews = Vec::new();

        for page in 1..=MAX_PAGES {
            let fetched = self
                .client
                .get_xml::<ShelfResponse>(&self.page_url(page), Auth::None)
                .await
                .map_err(|e| e.for_metric(metric))?;

            let shelf = fetched.body.reviews;
            tracing::debug!(
                metric,
                page,
                end = shelf.end,
                total = shelf.total,
                "Fetched Goodreads shelf page"
            );

            let empty = shelf.reviews.is_empty();
            reviews.extend(shelf.reviews);

            if empty || shelf.end >= shelf.total {
                break;
            }
        }

        Ok(reviews)
    }
}

#[derive(Debug, Deserialize)]
struct ShelfResponse {
    reviews: Shelf,
}

#[derive(Debug, Deserialize)]
struct Shelf {
    #[serde(rename = "@end", default)]
    end: u32,
    #[serde(rename = "@total", default)]
    total: u32,
    #[serde(rename = "review", default)]
    reviews: Vec<Review>,
}

#[derive(Debug, Deserialize)]
struct Review {
    #[serde(default)]
    book: Book,
    #[serde(default)]
    read_at: String,
}

#[derive(Debug, Default, Deserialize)]
struct Book {
    #[serde(default)]
    num_pages: String,
}

impl RawEvent for Review {
    fn occurred_at(&self) -> Result<Option<DateTime<Utc>>, DecodeError> {
        let raw = self.read_at.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        DateTime::parse_from_str(raw, READ_AT_FORMAT)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| DecodeError::date("read_at", raw, e))
    }

    fn amount(&self) -> Result<Option<f64>, DecodeError> {
        if self.book.num_pages.trim().is_empty() {
            return Ok(None);
        }
        parse_number("num_pages", &self.book.num_pages).map(Some)
    }
}

#[async_trait]
impl Collector for GoodreadsCollector {
    fn source(&self) -> &'static str {
        "goodreads"
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
        let name = format!("goodreads.{}", metric);

        let aggregator = match metric {
            "books_read" => Aggregator::count(granularity),
            _ => Aggregator::sum(granularity),
        };

        let buckets = generate_buckets(&name, start, end, granularity);
        let reviews = self.fetch_reviews(&name).await?;

        tracing::info!(metric = %name, reviews = reviews.len(), "Fetched Goodreads shelf");

        aggregator
            .aggregate(&reviews, buckets)
            .map_err(|e| CollectError::decoding(&name, e))
    }
}
