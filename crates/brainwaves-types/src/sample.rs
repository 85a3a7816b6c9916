//! Samples and the shapes they take on either side of the cache.
//!
//! A [`Sample`] is what the recording loader produces and what the
//! time-series cache stores. A [`PersistedRow`] is what lands in the
//! hypertable. The conversion between them is fallible: a millisecond
//! timestamp outside the range `chrono` can represent is a malformed record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped measurement from a single recording channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch (recording start is epoch 0).
    pub timestamp_ms: i64,
    /// Measured value.
    pub value: f64,
}

impl Sample {
    /// Create a sample.
    pub const fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// A sample's timestamp cannot be represented as a UTC date-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timestamp {0}ms is out of range for TIMESTAMPTZ")]
pub struct InvalidTimestamp(pub i64);

/// One row of the destination hypertable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedRow {
    /// Sample time.
    pub time: DateTime<Utc>,
    /// Measured value.
    pub value: f64,
}

impl TryFrom<&Sample> for PersistedRow {
    type Error = InvalidTimestamp;

    fn try_from(sample: &Sample) -> Result<Self, Self::Error> {
        let time = DateTime::<Utc>::from_timestamp_millis(sample.timestamp_ms)
            .ok_or(InvalidTimestamp(sample.timestamp_ms))?;
        Ok(Self {
            time,
            value: sample.value,
        })
    }
}

/// One end of an inclusive cache range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeBound {
    /// The oldest retained sample.
    Earliest,
    /// The newest retained sample.
    Latest,
    /// A concrete timestamp in milliseconds.
    At(i64),
}

impl RangeBound {
    /// Resolve the bound to a concrete timestamp, mapping the sentinels to
    /// the extremes of `i64`.
    pub const fn resolve(self) -> i64 {
        match self {
            Self::Earliest => i64::MIN,
            Self::Latest => i64::MAX,
            Self::At(ts) => ts,
        }
    }
}

impl core::fmt::Display for RangeBound {
    /// Formats the bound as a `TS.RANGE` argument (`-`, `+`, or the number).
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Earliest => f.write_str("-"),
            Self::Latest => f.write_str("+"),
            Self::At(ts) => write!(f, "{ts}"),
        }
    }
}

/// Number of `samples` a cache with the given retention keeps once all of
/// them have been appended.
///
/// Retention is measured back from the newest timestamp; a retention of `0`
/// keeps everything.
pub fn expected_retained(samples: &[Sample], retention_ms: u64) -> usize {
    if retention_ms == 0 {
        return samples.len();
    }
    let Some(newest) = samples.iter().map(|s| s.timestamp_ms).max() else {
        return 0;
    };
    let window = i64::try_from(retention_ms).unwrap_or(i64::MAX);
    let horizon = newest.saturating_sub(window);
    samples.iter().filter(|s| s.timestamp_ms >= horizon).count()
}
