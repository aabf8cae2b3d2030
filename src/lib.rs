//! # Statboard
//!
//! Personal activity statistics: collects steps, GitHub contributions and
//! reading progress from external services, aligns them onto gap-free daily
//! or monthly series, and keeps them in an ordered metric store.
//!
//! ## Modules
//!
//! - [`series`]: Buckets, granularity and event aggregation
//! - [`integrations`]: Source collectors, registry and concurrent runner
//! - [`storage`]: Metric store (SQLite or append-log backed)
//! - [`api`]: Read-only reporter API with Axum
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use statboard::config::Config;
//! use statboard::integrations::{CollectionJob, CollectionRunner, CollectorRegistry};
//! use statboard::storage::open_store;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let store = open_store(&config.storage)?;
//!     let registry = Arc::new(CollectorRegistry::from_config(&config)?);
//!
//!     let summary = CollectionRunner::new(registry, Arc::clone(&store))
//!         .policy(config.collector.failure_policy)
//!         .run(CollectionJob::from_config(&config, None, None))
//!         .await?;
//!
//!     println!("Wrote {} points", summary.points_written());
//!     store.close().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod integrations;
pub mod series;
pub mod storage;

// Re-export top-level types for convenience
pub use series::{Aggregator, DecodeError, Granularity, Lookback, MetricPoint, RawEvent};

pub use storage::{
    open_store, LogStore, MetricStore, SqliteStore, StorageBackend, StorageError, StorageResult,
};

pub use integrations::{
    CollectError, CollectionJob, CollectionRunner, Collector, CollectorRegistry, FailurePolicy,
    RunError, RunSummary,
};

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{Config, ConfigError};
