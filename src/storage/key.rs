//! Composite record keys
//!
//! Every stored point lives under `"<date>-<name>"`. The date half is a
//! fixed-width, zero-padded RFC 3339 timestamp in UTC with nanosecond
//! precision, so byte-wise key order equals chronological order for any
//! one metric name:
//!
//! ```text
//! 2018-01-01T00:00:00.000000000Z-fitbit.steps
//! 2018-02-01T00:00:00.000000000Z-fitbit.steps
//! ```
//!
//! chrono only zero-pads `%Y` to four digits and prefixes larger or
//! negative years with a sign, so dates outside 0000-9999 are rejected.

use crate::storage::error::{StorageError, StorageResult};
use chrono::{DateTime, Datelike, SecondsFormat, Utc};

/// strftime pattern for the date half of a key
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

/// Width in bytes of every encoded date
pub const DATE_WIDTH: usize = 30;

/// Encode the date half of a key
pub fn date_component(date: DateTime<Utc>) -> StorageResult<String> {
    if !(0..=9999).contains(&date.year()) {
        return Err(StorageError::KeyOutOfRange(
            date.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
    }
    Ok(date.format(DATE_FORMAT).to_string())
}

/// Decode a date written by [`date_component`]
pub fn parse_date_component(raw: &str) -> StorageResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

/// Build the `"<date>-<name>"` key for a point
pub fn composite_key(date: DateTime<Utc>, name: &str) -> StorageResult<String> {
    Ok(format!("{}-{}", date_component(date)?, name))
}

/// Where an exclusive `date > since` scan for one metric begins
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStart {
    /// Start strictly after this key
    After(String),
    /// `since` precedes every encodable date; scan from the beginning
    Beginning,
    /// `since` follows every encodable date; nothing can match
    Exhausted,
}

/// Compute the scan start for `get_metric(name, since)`
pub fn scan_start(name: &str, since: DateTime<Utc>) -> ScanStart {
    match since.year() {
        y if y < 0 => ScanStart::Beginning,
        y if y > 9999 => ScanStart::Exhausted,
        _ => ScanStart::After(format!("{}-{}", since.format(DATE_FORMAT), name)),
    }
}
