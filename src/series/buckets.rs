//! Bucket generation
//!
//! Produces the zero-valued skeleton a collector fills: one point per
//! calendar unit between `start` and `end`, both ends inclusive.

use crate::series::types::{Granularity, MetricPoint};
use chrono::{DateTime, Utc};

/// Generate an ordered, gap-free sequence of zero-valued buckets
///
/// `start` and `end` need not be aligned; both are truncated to
/// `granularity` first. When they truncate to the same bucket exactly one
/// point is produced. When `start` falls after `end` the result is empty.
pub fn generate_buckets(
    name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: Granularity,
) -> Vec<MetricPoint> {
    let last = granularity.truncate(end);
    let mut current = granularity.truncate(start);
    let mut buckets = Vec::with_capacity(bucket_count(current, last, granularity));

    while current <= last {
        buckets.push(MetricPoint::new(name, current));
        match granularity.next(current) {
            Some(next) => current = next,
            None => break,
        }
    }

    buckets
}

/// Number of buckets between two aligned instants (capacity hint only)
fn bucket_count(first: DateTime<Utc>, last: DateTime<Utc>, granularity: Granularity) -> usize {
    use chrono::Datelike;

    if first > last {
        return 0;
    }
    let units = match granularity {
        Granularity::Day => (last - first).num_days(),
        Granularity::Month => {
            i64::from(last.year() - first.year()) * 12 + i64::from(last.month())
                - i64::from(first.month())
        }
    };
    usize::try_from(units + 1).unwrap_or(0)
}
