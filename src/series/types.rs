//! Core data types for calendar-aligned metric series
//!
//! - `MetricPoint`: one bucket of a series (name, calendar date, value)
//! - `Granularity`: the calendar unit a series is bucketed at
//! - `Lookback`: how far before "yesterday" a collector reaches

use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single point of an aggregated metric series
///
/// `date` is always truncated to the series granularity (midnight UTC for
/// daily series, the first of the month for monthly series).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricPoint {
    /// Dot-namespaced metric name, e.g. `fitbit.steps`
    pub name: String,
    /// Calendar instant the bucket starts at
    pub date: DateTime<Utc>,
    /// Accumulated value (count or sum, source-defined)
    pub value: f64,
}

impl MetricPoint {
    /// Create a zero-valued point
    pub fn new(name: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            date,
            value: 0.0,
        }
    }

    /// Builder method: set value
    pub fn value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    /// Source half of the dot-namespaced name (`fitbit` for `fitbit.steps`)
    pub fn source(&self) -> &str {
        split_metric_name(&self.name).0
    }
}

/// Split `<source>.<metric>` at the first dot
///
/// A name without a dot is treated as a bare metric with an empty source.
pub fn split_metric_name(name: &str) -> (&str, &str) {
    name.split_once('.').unwrap_or(("", name))
}

/// Calendar unit used to bucket a series
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One bucket per calendar day (midnight UTC)
    #[default]
    Day,
    /// One bucket per calendar month (first of the month, midnight UTC)
    Month,
}

impl Granularity {
    /// Truncate an instant to the start of its bucket
    pub fn truncate(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let date = instant.date_naive();
        let start = match self {
            Granularity::Day => date,
            // Every month has a first day
            Granularity::Month => date.with_day(1).unwrap_or(date),
        };
        Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN))
    }

    /// Advance a bucket start by one unit
    ///
    /// Returns `None` only when the calendar overflows chrono's range.
    pub fn next(&self, bucket: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Granularity::Day => bucket.checked_add_signed(Duration::days(1)),
            Granularity::Month => bucket.checked_add_months(Months::new(1)),
        }
    }

    /// Step back `amount` units from an instant
    pub fn back(&self, instant: DateTime<Utc>, amount: u32) -> Option<DateTime<Utc>> {
        match self {
            Granularity::Day => instant.checked_sub_signed(Duration::days(i64::from(amount))),
            Granularity::Month => instant.checked_sub_months(Months::new(amount)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Month => "month",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a granularity string is not `day` or `month`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported granularity: {0:?} (expected \"day\" or \"month\")")]
pub struct UnsupportedGranularity(pub String);

impl FromStr for Granularity {
    type Err = UnsupportedGranularity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Granularity::Day),
            "month" | "monthly" => Ok(Granularity::Month),
            other => Err(UnsupportedGranularity(other.to_string())),
        }
    }
}

/// Span before "yesterday" a collector gathers data over
///
/// Sources disagree on whether lookback is counted in days or months, so
/// the unit travels with the amount instead of being fixed per collector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lookback {
    pub amount: u32,
    pub unit: Granularity,
}

impl Lookback {
    pub fn days(amount: u32) -> Self {
        Self {
            amount,
            unit: Granularity::Day,
        }
    }

    pub fn months(amount: u32) -> Self {
        Self {
            amount,
            unit: Granularity::Month,
        }
    }

    /// Instant `amount` units before `from`, saturating at chrono's minimum
    pub fn before(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        self.unit
            .back(from, self.amount)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.amount == 1 { "" } else { "s" };
        write!(f, "{} {}{}", self.amount, self.unit, plural)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_truncate_day() {
        let t = utc(2009, 11, 17, 20, 34, 58);
        assert_eq!(Granularity::Day.truncate(t), utc(2009, 11, 17, 0, 0, 0));
    }

    #[test]
    fn test_truncate_month() {
        let t = utc(2016, 2, 29, 23, 59, 59);
        assert_eq!(Granularity::Month.truncate(t), utc(2016, 2, 1, 0, 0, 0));
        // Already aligned stays put
        let first = utc(2018, 1, 1, 0, 0, 0);
        assert_eq!(Granularity::Month.truncate(first), first);
    }

    #[test]
    fn test_next_month_crosses_year() {
        let dec = utc(2017, 12, 1, 0, 0, 0);
        assert_eq!(Granularity::Month.next(dec), Some(utc(2018, 1, 1, 0, 0, 0)));
    }

    #[test]
    fn test_granularity_from_str() {
        assert_eq!("day".parse::<Granularity>().unwrap(), Granularity::Day);
        assert_eq!("Month".parse::<Granularity>().unwrap(), Granularity::Month);
        let err = "week".parse::<Granularity>().unwrap_err();
        assert_eq!(err, UnsupportedGranularity("week".to_string()));
    }

    #[test]
    fn test_lookback_before() {
        let end = utc(2018, 3, 31, 10, 0, 0);
        assert_eq!(Lookback::days(30).before(end), utc(2018, 3, 1, 10, 0, 0));
        // chrono clamps to the last valid day of the shorter month
        assert_eq!(Lookback::months(1).before(end), utc(2018, 2, 28, 10, 0, 0));
        assert_eq!(Lookback::days(0).before(end), end);
    }

    #[test]
    fn test_split_metric_name() {
        assert_eq!(split_metric_name("fitbit.steps"), ("fitbit", "steps"));
        assert_eq!(split_metric_name("goodreads.pages.read"), ("goodreads", "pages.read"));
        assert_eq!(split_metric_name("steps"), ("", "steps"));

        let point = MetricPoint::new("github.contributions", utc(2018, 1, 1, 0, 0, 0));
        assert_eq!(point.source(), "github");
    }
}
