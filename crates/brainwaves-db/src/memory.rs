//! In-memory cache and sink with the same observable semantics as the live
//! stores.
//!
//! [`MemorySeriesCache`] follows `RedisTimeSeries` rules: creating an existing
//! key fails, negative and duplicate timestamps are refused, retention is
//! measured back from the newest sample, and samples older than that horizon
//! are refused.
//! [`MemorySampleStore`] follows `PostgreSQL` rules: inserts before the
//! schema exists fail, and a batch is all-or-nothing.
//!
//! Both exist so the pipeline can be exercised end-to-end without services.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use brainwaves_types::{PersistedRow, RangeBound, Sample};

use crate::error::DbError;
use crate::sample_store::SampleSink;
use crate::series_cache::SeriesCache;

#[derive(Debug, Default)]
struct MemorySeries {
    retention_ms: u64,
    points: BTreeMap<i64, f64>,
}

impl MemorySeries {
    fn horizon(&self) -> Option<i64> {
        if self.retention_ms == 0 {
            return None;
        }
        let newest = *self.points.keys().next_back()?;
        let window = i64::try_from(self.retention_ms).unwrap_or(i64::MAX);
        Some(newest.saturating_sub(window))
    }

    fn insert(&mut self, key: &str, sample: Sample) -> Result<(), DbError> {
        let reject = |reason: &str| DbError::Rejected {
            command: "TS.ADD",
            key: key.to_owned(),
            reason: reason.to_owned(),
        };
        if sample.timestamp_ms < 0 {
            return Err(reject("invalid timestamp"));
        }
        if self.horizon().is_some_and(|h| sample.timestamp_ms < h) {
            return Err(reject("timestamp is older than retention"));
        }
        if self.points.contains_key(&sample.timestamp_ms) {
            return Err(reject("duplicate timestamp (BLOCK policy)"));
        }
        self.points.insert(sample.timestamp_ms, sample.value);
        if let Some(horizon) = self.horizon() {
            self.points = self.points.split_off(&horizon);
        }
        Ok(())
    }
}

/// A `RedisTimeSeries` stand-in backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemorySeriesCache {
    series: Mutex<HashMap<String, MemorySeries>>,
}

impl MemorySeriesCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MemorySeries>> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `key` currently exists.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of samples currently retained under `key`.
    pub fn len(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, |s| s.points.len())
    }

    /// Whether `key` holds no samples.
    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }
}

impl SeriesCache for MemorySeriesCache {
    async fn create_series(&self, key: &str, retention_ms: u64) -> Result<(), DbError> {
        let mut series = self.lock();
        if series.contains_key(key) {
            return Err(DbError::Rejected {
                command: "TS.CREATE",
                key: key.to_owned(),
                reason: "key already exists".to_owned(),
            });
        }
        series.insert(
            key.to_owned(),
            MemorySeries {
                retention_ms,
                points: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn append(&self, key: &str, sample: Sample) -> Result<(), DbError> {
        // TS.ADD creates a missing key with no retention.
        self.lock()
            .entry(key.to_owned())
            .or_default()
            .insert(key, sample)
    }

    async fn append_all(&self, key: &str, samples: &[Sample]) -> Result<usize, DbError> {
        let mut series = self.lock();
        let target = series.entry(key.to_owned()).or_default();
        for sample in samples {
            target.insert(key, *sample)?;
        }
        Ok(samples.len())
    }

    async fn read_range(
        &self,
        key: &str,
        from: RangeBound,
        to: RangeBound,
    ) -> Result<Vec<Sample>, DbError> {
        let (from, to) = (from.resolve(), to.resolve());
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self.lock().get(key).map_or_else(Vec::new, |s| {
            s.points
                .range(from..=to)
                .map(|(ts, v)| Sample::new(*ts, *v))
                .collect()
        }))
    }

    async fn delete(&self, key: &str) -> Result<bool, DbError> {
        Ok(self.lock().remove(key).is_some())
    }
}

#[derive(Debug, Default)]
struct StoreState {
    schema_ready: bool,
    ensure_calls: u32,
    rows: Vec<PersistedRow>,
}

/// A hypertable stand-in that keeps rows in a vector.
#[derive(Debug, Default)]
pub struct MemorySampleStore {
    state: Mutex<StoreState>,
}

impl MemorySampleStore {
    /// Create a store with no schema.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of all committed rows, in insertion order.
    pub fn rows(&self) -> Vec<PersistedRow> {
        self.lock().rows.clone()
    }

    /// Whether the schema has been created.
    pub fn schema_ready(&self) -> bool {
        self.lock().schema_ready
    }

    /// How many times [`SampleSink::ensure_schema`] has been called.
    pub fn ensure_calls(&self) -> u32 {
        self.lock().ensure_calls
    }
}

impl SampleSink for MemorySampleStore {
    async fn ensure_schema(&self) -> Result<(), DbError> {
        let mut state = self.lock();
        state.schema_ready = true;
        state.ensure_calls = state.ensure_calls.saturating_add(1);
        Ok(())
    }

    async fn bulk_insert(&self, samples: &[Sample]) -> Result<u64, DbError> {
        let mut state = self.lock();
        if !state.schema_ready {
            return Err(DbError::Rejected {
                command: "INSERT",
                key: crate::sample_store::DEFAULT_TABLE.to_owned(),
                reason: "relation does not exist".to_owned(),
            });
        }
        let staged = samples
            .iter()
            .map(PersistedRow::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let inserted = u64::try_from(staged.len()).unwrap_or(u64::MAX);
        state.rows.extend(staged);
        Ok(inserted)
    }

    async fn count_rows(&self) -> Result<u64, DbError> {
        Ok(u64::try_from(self.lock().rows.len()).unwrap_or(u64::MAX))
    }
}
