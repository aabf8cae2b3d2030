//! SQLite metric store
//!
//! Uses SQLite's B-tree as the ordered key space. Rows are keyed by the
//! composite `"<date>-<name>"` key and additionally indexed on
//! `(name, key)`, so a query for one metric is an index seek on the name
//! followed by an ordered range scan over that metric's keys only.
//!
//! Text comparison uses SQLite's default BINARY collation (memcmp), which
//! is what the fixed-width key encoding relies on.

use crate::series::MetricPoint;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::key::{composite_key, date_component, parse_date_component, scan_start, ScanStart};
use crate::storage::{MetricStore, StorageBackend};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const UPSERT_SQL: &str = "INSERT INTO metrics (key, name, date, value)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value";

/// Name-partitioned metric store on a single SQLite file
pub struct SqliteStore {
    /// `None` once closed (std::sync::Mutex because Connection is !Sync)
    conn: Mutex<Option<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Create or open the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            CREATE TABLE IF NOT EXISTS metrics (
                key   TEXT PRIMARY KEY NOT NULL,
                name  TEXT NOT NULL,
                date  TEXT NOT NULL,
                value REAL NOT NULL
            ) WITHOUT ROWID;

            CREATE INDEX IF NOT EXISTS idx_metrics_name_key ON metrics(name, key);
            ",
        )?;

        tracing::debug!(path = %path.display(), "Opened SQLite metric store");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path,
        })
    }

    /// Run `f` against the open connection
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> StorageResult<T>) -> StorageResult<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire connection lock: {}", e)))?;
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;
        f(conn)
    }

    fn upsert(conn: &Connection, point: &MetricPoint) -> StorageResult<()> {
        let key = composite_key(point.date, &point.name)?;
        let date = date_component(point.date)?;
        conn.prepare_cached(UPSERT_SQL)?
            .execute(params![key, point.name, date, point.value])?;
        Ok(())
    }

    fn read_rows(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StorageResult<Vec<MetricPoint>> {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;

        let mut points = Vec::new();
        for row in rows {
            let (name, date, value) = row?;
            points.push(MetricPoint {
                name,
                date: parse_date_component(&date)?,
                value,
            });
        }
        Ok(points)
    }
}

#[async_trait]
impl MetricStore for SqliteStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Sqlite
    }

    async fn write_metric(&self, point: &MetricPoint) -> StorageResult<()> {
        self.with_conn(|conn| Self::upsert(conn, point))
    }

    async fn write_batch(&self, points: &[MetricPoint]) -> StorageResult<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for point in points {
                Self::upsert(&tx, point)?;
            }
            tx.commit()?;
            Ok(points.len())
        })
    }

    async fn get_metric(&self, name: &str, since: DateTime<Utc>) -> StorageResult<Vec<MetricPoint>> {
        let points = self.with_conn(|conn| match scan_start(name, since) {
            ScanStart::Exhausted => Ok(Vec::new()),
            ScanStart::Beginning => Self::read_rows(
                conn,
                "SELECT name, date, value FROM metrics WHERE name = ?1 ORDER BY key",
                params![name],
            ),
            ScanStart::After(key) => Self::read_rows(
                conn,
                "SELECT name, date, value FROM metrics
                 WHERE name = ?1 AND key > ?2
                 ORDER BY key",
                params![name, key],
            ),
        })
        .map_err(|e| e.context("get", name))?;

        tracing::debug!(metric = %name, found = points.len(), "Read metric from SQLite store");
        Ok(points)
    }

    async fn close(&self) -> StorageResult<()> {
        let conn = {
            let mut guard = self
                .conn
                .lock()
                .map_err(|e| StorageError::Lock(format!("Failed to acquire connection lock: {}", e)))?;
            guard.take().ok_or(StorageError::Closed)?
        };

        conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
        tracing::debug!(path = %self.path.display(), "Closed SQLite metric store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_rows_are_name_partitioned() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("statboard.db")).unwrap();

        store
            .write_batch(&[
                MetricPoint::new("github.contributions", day(2018, 1, 1)).value(4.0),
                MetricPoint::new("fitbit.steps", day(2018, 1, 1)).value(9000.0),
                MetricPoint::new("fitbit.steps", day(2018, 1, 2)).value(12000.0),
            ])
            .await
            .unwrap();

        let steps = store.get_metric("fitbit.steps", day(2017, 1, 1)).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|p| p.name == "fitbit.steps"));

        let explain: String = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "EXPLAIN QUERY PLAN SELECT name, date, value FROM metrics
                     WHERE name = ?1 AND key > ?2 ORDER BY key",
                    params!["fitbit.steps", ""],
                    |row| row.get::<_, String>(3),
                )?)
            })
            .unwrap();
        assert!(explain.contains("idx_metrics_name_key"), "plan: {}", explain);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("statboard.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .write_metric(&MetricPoint::new("goodreads.pages_read", day(2018, 2, 1)).value(320.0))
                .await
                .unwrap();
            store.close().await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let points = store.get_metric("goodreads.pages_read", day(2018, 1, 1)).await.unwrap();
        assert_eq!(points, vec![MetricPoint::new("goodreads.pages_read", day(2018, 2, 1)).value(320.0)]);
    }

    #[tokio::test]
    async fn test_batch_rolls_back_on_bad_key() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("statboard.db")).unwrap();
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();

        let result = store
            .write_batch(&[
                MetricPoint::new("m", day(2018, 1, 1)).value(1.0),
                MetricPoint::new("m", far).value(2.0),
            ])
            .await;
        assert!(matches!(result, Err(StorageError::KeyOutOfRange(_))));

        let points = store.get_metric("m", DateTime::<Utc>::MIN_UTC).await.unwrap();
        assert!(points.is_empty());
    }
}
