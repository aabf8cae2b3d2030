//! Append-only record log
//!
//! Durable backing file for the in-memory keyspace of [`LogStore`]. Every
//! upsert is appended; replaying the log in order and letting later
//! records overwrite earlier ones rebuilds the keyspace.
//!
//! Format per entry:
//! - length: u32 (4 bytes, little endian)
//! - data: [u8; length] (bincode-serialized `StoredRecord`)
//! - crc: u32 (4 bytes, CRC32 of length + data)
//!
//! [`LogStore`]: crate::storage::LogStore

use crate::series::MetricPoint;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::key::composite_key;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Largest entry accepted on replay
const MAX_ENTRY_LEN: usize = 1_000_000;

/// A point together with the composite key it is stored under
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub point: MetricPoint,
}

impl StoredRecord {
    pub fn new(point: MetricPoint) -> StorageResult<Self> {
        let key = composite_key(point.date, &point.name)?;
        Ok(Self { key, point })
    }
}

/// Sync strategy for log appends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Fsync after every write (safest, slowest)
    EveryWrite,
    /// Fsync once enough bytes accumulate
    #[default]
    Batched,
    /// Flush to the OS only
    None,
}

/// Result of replaying a log file
#[derive(Debug, Default)]
pub struct Replay {
    /// Records in write order
    pub records: Vec<StoredRecord>,
    /// Byte length of the valid prefix
    pub valid_len: u64,
    /// Whether replay stopped at a damaged entry
    pub torn: bool,
}

/// Append-only, CRC-framed record log
pub struct RecordLog {
    writer: BufWriter<File>,
    path: PathBuf,
    entry_count: u64,
    bytes_since_sync: usize,
    sync_mode: SyncMode,
    sync_threshold: usize,
}

impl RecordLog {
    /// Open or create a log file, returning it with everything it held
    ///
    /// A damaged tail (torn write, CRC mismatch) is cut off so new entries
    /// are appended right after the last intact one.
    pub fn open(path: impl AsRef<Path>, sync_mode: SyncMode) -> StorageResult<(Self, Replay)> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let replay = Self::replay(&path)?;
        if replay.torn {
            tracing::warn!(
                path = %path.display(),
                kept = replay.records.len(),
                "Truncating damaged tail of record log"
            );
            OpenOptions::new()
                .write(true)
                .open(&path)?
                .set_len(replay.valid_len)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let log = Self {
            writer: BufWriter::new(file),
            path,
            entry_count: replay.records.len() as u64,
            bytes_since_sync: 0,
            sync_mode,
            sync_threshold: 64 * 1024,
        };

        Ok((log, replay))
    }

    /// Read every intact entry of a log file
    pub fn replay(path: &Path) -> StorageResult<Replay> {
        if !path.exists() {
            return Ok(Replay::default());
        }

        let mut reader = BufReader::new(File::open(path)?);
        let mut replay = Replay::default();

        loop {
            match Self::read_entry_from(&mut reader) {
                Ok(Some((record, len))) => {
                    replay.records.push(record);
                    replay.valid_len += len;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Record log replay stopped at entry {}: {}", replay.records.len(), e);
                    replay.torn = true;
                    break;
                }
            }
        }

        Ok(replay)
    }

    /// Append one record
    pub fn append(&mut self, record: &StoredRecord) -> StorageResult<()> {
        self.write_entry(record)?;
        self.maybe_sync()
    }

    fn write_entry(&mut self, record: &StoredRecord) -> StorageResult<()> {
        let data = bincode::serialize(record)?;
        let len = (data.len() as u32).to_le_bytes();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len);
        hasher.update(&data);
        let crc = hasher.finalize();

        // Write: length (4) + data (N) + crc (4)
        self.writer.write_all(&len)?;
        self.writer.write_all(&data)?;
        self.writer.write_all(&crc.to_le_bytes())?;

        self.entry_count += 1;
        self.bytes_since_sync += 8 + data.len();
        Ok(())
    }

    fn maybe_sync(&mut self) -> StorageResult<()> {
        match self.sync_mode {
            SyncMode::EveryWrite => self.sync()?,
            SyncMode::Batched => {
                if self.bytes_since_sync >= self.sync_threshold {
                    self.sync()?;
                } else {
                    self.writer.flush()?;
                }
            }
            SyncMode::None => self.writer.flush()?,
        }
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> StorageResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Replace the log with exactly `records`, dropping superseded entries
    ///
    /// Written to a sibling temp file and renamed into place.
    pub fn compact<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a StoredRecord>,
    ) -> StorageResult<()> {
        self.sync()?;

        let tmp_path = self.path.with_extension("compact");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut tmp = Self {
                writer: BufWriter::new(file),
                path: tmp_path.clone(),
                entry_count: 0,
                bytes_since_sync: 0,
                sync_mode: SyncMode::None,
                sync_threshold: self.sync_threshold,
            };
            for record in records {
                tmp.write_entry(record)?;
            }
            tmp.sync()?;
            self.entry_count = tmp.entry_count;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        self.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Read a single entry, returning it with its framed length
    fn read_entry_from<R: Read>(reader: &mut R) -> StorageResult<Option<(StoredRecord, u64)>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            match reader.read(&mut len_buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => return Ok(None),
            4 => {}
            n => {
                return Err(StorageError::Corruption(format!(
                    "Partial entry header: {} of 4 bytes",
                    n
                )))
            }
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        if len > MAX_ENTRY_LEN {
            return Err(StorageError::Corruption(format!(
                "Entry length too large: {}",
                len
            )));
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_buf);
        hasher.update(&data);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(StorageError::Corruption(format!(
                "CRC mismatch: stored={}, computed={}",
                stored_crc, computed_crc
            )));
        }

        let record: StoredRecord = bincode::deserialize(&data)?;
        Ok(Some((record, 8 + len as u64)))
    }

    /// Number of entries in the log, superseded ones included
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }
}
