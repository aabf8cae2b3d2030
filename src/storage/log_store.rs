//! Log-backed metric store
//!
//! Keeps the whole keyspace in a `BTreeMap` ordered by composite key and
//! persists every upsert to a [`RecordLog`]. Opening replays the log;
//! closing compacts it down to the live records.

use crate::series::MetricPoint;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::key::{scan_start, ScanStart};
use crate::storage::log::{RecordLog, StoredRecord, SyncMode};
use crate::storage::{MetricStore, StorageBackend};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

struct LogState {
    log: RecordLog,
    keyspace: BTreeMap<String, StoredRecord>,
}

/// Single-keyspace store with an append-only log for durability
pub struct LogStore {
    state: Mutex<Option<LogState>>,
    path: PathBuf,
}

impl LogStore {
    /// Open the log at `path`, replaying whatever it already holds
    pub fn open(path: impl AsRef<Path>, sync_mode: SyncMode) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (log, replay) = RecordLog::open(&path, sync_mode)?;

        let replayed = replay.records.len();
        let mut keyspace = BTreeMap::new();
        for record in replay.records {
            keyspace.insert(record.key.clone(), record);
        }

        tracing::info!(
            path = %path.display(),
            entries = replayed,
            live = keyspace.len(),
            "Opened log metric store"
        );

        Ok(Self {
            state: Mutex::new(Some(LogState { log, keyspace })),
            path,
        })
    }

    /// Number of distinct keys currently stored
    pub async fn len(&self) -> StorageResult<usize> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(state.keyspace.len())
    }

    pub async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl MetricStore for LogStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Log
    }

    async fn write_metric(&self, point: &MetricPoint) -> StorageResult<()> {
        let record = StoredRecord::new(point.clone())?;

        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(StorageError::Closed)?;

        state.log.append(&record)?;
        state.keyspace.insert(record.key.clone(), record);
        Ok(())
    }

    async fn write_batch(&self, points: &[MetricPoint]) -> StorageResult<usize> {
        let records = points
            .iter()
            .cloned()
            .map(StoredRecord::new)
            .collect::<StorageResult<Vec<_>>>()?;

        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(StorageError::Closed)?;

        for record in records {
            state.log.append(&record)?;
            state.keyspace.insert(record.key.clone(), record);
        }
        Ok(points.len())
    }

    async fn get_metric(&self, name: &str, since: DateTime<Utc>) -> StorageResult<Vec<MetricPoint>> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(StorageError::Closed)?;

        let range = match scan_start(name, since) {
            ScanStart::Exhausted => return Ok(Vec::new()),
            ScanStart::Beginning => state.keyspace.range::<String, _>(..),
            ScanStart::After(key) => state
                .keyspace
                .range::<String, _>((Bound::Excluded(key), Bound::Unbounded)),
        };

        // The keyspace interleaves every metric; skip other names
        let points: Vec<MetricPoint> = range
            .map(|(_, record)| &record.point)
            .filter(|point| point.name == name && point.date > since)
            .cloned()
            .collect();

        tracing::debug!(metric = %name, found = points.len(), "Read metric from log store");
        Ok(points)
    }

    async fn close(&self) -> StorageResult<()> {
        let mut guard = self.state.lock().await;
        let mut state = guard.take().ok_or(StorageError::Closed)?;

        let before = state.log.entry_count();
        state.log.compact(state.keyspace.values())?;
        state.log.sync()?;

        tracing::info!(
            path = %self.path.display(),
            before,
            after = state.log.entry_count(),
            "Closed log metric store"
        );
        Ok(())
    }
}
