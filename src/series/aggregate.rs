//! Event aggregation
//!
//! Maps a source's raw events onto a bucket skeleton. Every source shares
//! the same contract: filter by event type, truncate the event date to the
//! bucket granularity, find the bucket with that date, then add either 1
//! (count metrics) or the event's numeric payload (sum metrics).
//!
//! Matching goes through a date → bucket index map instead of a nested
//! scan, so cost is O(events + buckets).

use crate::series::error::DecodeError;
use crate::series::types::{Granularity, MetricPoint};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A source-specific record that can contribute to a metric
pub trait RawEvent {
    /// Whether this event's type counts toward the metric at all
    fn is_counted(&self) -> bool {
        true
    }

    /// When the event happened
    ///
    /// `Ok(None)` means the record carries no date (for example a shelved
    /// book that was never finished) and is skipped.
    fn occurred_at(&self) -> Result<Option<DateTime<Utc>>, DecodeError>;

    /// Numeric payload summed by `Accumulation::Sum`
    ///
    /// `Ok(None)` means the record has no payload and is skipped for sums.
    fn amount(&self) -> Result<Option<f64>, DecodeError> {
        Ok(None)
    }
}

/// How a matching event changes its bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulation {
    /// Add 1 per event
    Count,
    /// Add the event's `amount()`
    Sum,
}

/// Outcome counters for one `fill` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillStats {
    /// Events that landed in a bucket
    pub matched: usize,
    /// Events whose date fell outside the bucket range
    pub out_of_range: usize,
    /// Events rejected by type or lacking a date/payload
    pub skipped: usize,
}

/// Stateless aggregator for one metric
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    granularity: Granularity,
    accumulation: Accumulation,
}

impl Aggregator {
    pub fn new(granularity: Granularity, accumulation: Accumulation) -> Self {
        Self {
            granularity,
            accumulation,
        }
    }

    pub fn count(granularity: Granularity) -> Self {
        Self::new(granularity, Accumulation::Count)
    }

    pub fn sum(granularity: Granularity) -> Self {
        Self::new(granularity, Accumulation::Sum)
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Accumulate `events` into `buckets`
    ///
    /// All events are decoded before any bucket is touched: if one of them
    /// is malformed the call fails and `buckets` is left exactly as given.
    /// If `buckets` contains duplicate dates only the first one is filled.
    pub fn fill<E: RawEvent>(
        &self,
        events: &[E],
        buckets: &mut [MetricPoint],
    ) -> Result<FillStats, DecodeError> {
        let mut index: HashMap<DateTime<Utc>, usize> = HashMap::with_capacity(buckets.len());
        for (i, bucket) in buckets.iter().enumerate() {
            index.entry(bucket.date).or_insert(i);
        }

        let mut staged = vec![0.0f64; buckets.len()];
        let mut stats = FillStats::default();

        for event in events {
            if !event.is_counted() {
                stats.skipped += 1;
                continue;
            }

            let Some(at) = event.occurred_at()? else {
                stats.skipped += 1;
                continue;
            };

            let delta = match self.accumulation {
                Accumulation::Count => 1.0,
                Accumulation::Sum => match event.amount()? {
                    Some(amount) => amount,
                    None => {
                        stats.skipped += 1;
                        continue;
                    }
                },
            };

            match index.get(&self.granularity.truncate(at)) {
                Some(&i) => {
                    staged[i] += delta;
                    stats.matched += 1;
                }
                None => stats.out_of_range += 1,
            }
        }

        for (bucket, delta) in buckets.iter_mut().zip(staged) {
            bucket.value += delta;
        }

        Ok(stats)
    }

    /// Owned-sequence form of [`Aggregator::fill`]
    pub fn aggregate<E: RawEvent>(
        &self,
        events: &[E],
        mut buckets: Vec<MetricPoint>,
    ) -> Result<Vec<MetricPoint>, DecodeError> {
        self.fill(events, &mut buckets)?;
        Ok(buckets)
    }
}

/// Parse a decimal string field, rejecting empty or non-finite input
pub fn parse_number(field: &'static str, raw: &str) -> Result<f64, DecodeError> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DecodeError::number(field, raw)),
    }
}
