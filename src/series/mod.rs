//! Calendar-aligned series
//!
//! - **types**: `MetricPoint`, `Granularity`, `Lookback`
//! - **buckets**: zero-valued, gap-free bucket skeletons
//! - **aggregate**: filling skeletons from raw source events
//! - **error**: decoding failures for raw events
//!
//! ```text
//!   generate_buckets(name, start, end, g) ──► [0, 0, 0, ...]
//!                                                  │
//!   raw events ──► Aggregator::fill ───────────────┘──► [3, 0, 12, ...]
//! ```

pub mod aggregate;
pub mod buckets;
pub mod error;
pub mod types;

pub use aggregate::{parse_number, Accumulation, Aggregator, FillStats, RawEvent};
pub use buckets::generate_buckets;
pub use error::DecodeError;
pub use types::{split_metric_name, Granularity, Lookback, MetricPoint, UnsupportedGranularity};
