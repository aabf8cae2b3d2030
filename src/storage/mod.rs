//! Metric store
//!
//! Durable, ordered storage for computed metric points:
//!
//! - **key**: the `"<date>-<name>"` composite key encoding
//! - **sqlite**: SQLite-backed store, partitioned by metric name
//! - **log**: append-only CRC-framed record log
//! - **log_store**: in-memory ordered keyspace persisted by the record log
//! - **error**: error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   MetricPoint → composite key → upsert (last write wins)
//!
//! Read Path:
//!   get_metric(name, since) → seek past "<since>-<name>" → ordered scan
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use statboard::series::MetricPoint;
//! use statboard::storage::{MetricStore, SqliteStore};
//! use chrono::{TimeZone, Utc};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteStore::open("./data/statboard.db")?;
//!
//!     let jan = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
//!     store.write_metric(&MetricPoint::new("fitbit.steps", jan).value(150.0)).await?;
//!
//!     let since = Utc.with_ymd_and_hms(2017, 12, 31, 0, 0, 0).unwrap();
//!     let points = store.get_metric("fitbit.steps", since).await?;
//!     assert_eq!(points.len(), 1);
//!
//!     store.close().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod key;
pub mod log;
pub mod log_store;
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use key::{composite_key, scan_start, ScanStart};
pub use log::{RecordLog, StoredRecord, SyncMode};
pub use log_store::LogStore;
pub use sqlite::SqliteStore;

use crate::config::StorageConfig;
use crate::series::MetricPoint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Which store implementation backs the metric store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Log,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Sqlite => "sqlite",
            StorageBackend::Log => "log",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StorageBackend::Sqlite),
            "log" => Ok(StorageBackend::Log),
            other => Err(StorageError::Config(format!("Unknown storage backend: {}", other))),
        }
    }
}

/// Durable store of metric points keyed by `"<date>-<name>"`
///
/// Writes are idempotent upserts: writing the same `(name, date)` twice
/// leaves exactly one record holding the last value. Reads return every
/// point of one metric with `date > since` in ascending date order.
///
/// After [`close`](MetricStore::close) every operation, a second close
/// included, fails with [`StorageError::Closed`].
#[async_trait]
pub trait MetricStore: Send + Sync {
    fn backend(&self) -> StorageBackend;

    /// Insert or overwrite one point
    async fn write_metric(&self, point: &MetricPoint) -> StorageResult<()>;

    /// Insert or overwrite many points, returning how many were written
    async fn write_batch(&self, points: &[MetricPoint]) -> StorageResult<usize> {
        for point in points {
            self.write_metric(point).await?;
        }
        Ok(points.len())
    }

    /// All points named `name` with `date > since`, oldest first
    async fn get_metric(&self, name: &str, since: DateTime<Utc>) -> StorageResult<Vec<MetricPoint>>;

    /// Flush and release the store
    async fn close(&self) -> StorageResult<()>;
}

/// Open the store described by `config`
pub fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn MetricStore>> {
    tracing::info!(
        backend = %config.backend,
        path = %config.path.display(),
        "Opening metric store"
    );

    let store: Arc<dyn MetricStore> = match config.backend {
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&config.path)?),
        StorageBackend::Log => Arc::new(LogStore::open(&config.path, config.sync)?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("sqlite".parse::<StorageBackend>().unwrap(), StorageBackend::Sqlite);
        assert_eq!("LOG".parse::<StorageBackend>().unwrap(), StorageBackend::Log);
        assert!(matches!(
            "bolt".parse::<StorageBackend>(),
            Err(StorageError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_open_store_picks_backend() {
        let dir = tempdir().unwrap();

        for backend in [StorageBackend::Sqlite, StorageBackend::Log] {
            let config = StorageConfig {
                path: dir.path().join(format!("store.{}", backend)),
                backend,
                sync: SyncMode::None,
            };
            let store = open_store(&config).unwrap();
            assert_eq!(store.backend(), backend);
            store.close().await.unwrap();
        }
    }
}
