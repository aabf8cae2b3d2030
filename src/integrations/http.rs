//! HTTP plumbing shared by the collectors
//!
//! One GET per fetch. Bodies are read as text and decoded separately so a
//! transport failure and a malformed payload surface as different errors.

use super::CollectError;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Credentials attached to a request
#[derive(Debug, Clone, Copy)]
pub enum Auth<'a> {
    None,
    Bearer(&'a str),
}

/// A decoded response body plus the server's next-page signal
#[derive(Debug)]
pub struct Fetched<T> {
    pub body: T,
    /// Target of a `Link: <...>; rel="next"` header, if any
    pub next: Option<String>,
}

/// Failure of a single fetch, before it is attributed to a metric
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("malformed response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    /// Attribute the failure to `metric`
    pub fn for_metric(self, metric: &str) -> CollectError {
        match self {
            FetchError::Decode { .. } => CollectError::DecodingFailed {
                metric: metric.to_string(),
                message: self.to_string(),
            },
            FetchError::Transport { .. } | FetchError::Status { .. } => {
                CollectError::CollectionFailed {
                    metric: metric.to_string(),
                    message: self.to_string(),
                }
            }
        }
    }
}

/// Thin reqwest wrapper used by every collector
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
}

impl ApiClient {
    /// Build a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, CollectError> {
        let client = Client::builder()
            .user_agent(concat!("statboard/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| CollectError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// GET `url` and return the raw body with the next-page link
    pub async fn get_text(&self, url: &str, auth: Auth<'_>) -> Result<Fetched<String>, FetchError> {
        let mut request = self.client.get(url);
        if let Auth::Bearer(token) = auth {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let next = next_link(response.headers());
        let body = response.text().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(Fetched { body, next })
    }

    /// GET `url` and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: Auth<'_>,
    ) -> Result<Fetched<T>, FetchError> {
        let fetched = self.get_text(url, auth).await?;
        let body = serde_json::from_str(&fetched.body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(Fetched {
            body,
            next: fetched.next,
        })
    }

    /// GET `url` and decode an XML body
    pub async fn get_xml<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: Auth<'_>,
    ) -> Result<Fetched<T>, FetchError> {
        let fetched = self.get_text(url, auth).await?;
        let body = quick_xml::de::from_str(&fetched.body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(Fetched {
            body,
            next: fetched.next,
        })
    }
}

/// Extract the `rel="next"` target from RFC 8288 `Link` headers
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|link| {
            let mut parts = link.split(';').map(str::trim);
            let target = parts.next()?.strip_prefix('<')?.strip_suffix('>')?;
            parts
                .any(|param| param == "rel=\"next\"" || param == "rel=next")
                .then(|| target.to_string())
        })
}
