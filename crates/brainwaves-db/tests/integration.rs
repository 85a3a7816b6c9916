//! Integration tests for the `brainwaves-db` data layer.
//!
//! These tests require live Docker services (Redis Stack and `TimescaleDB`).
//! Run with:
//!
//! ```bash
//! docker compose up -d
//! cargo test -p brainwaves-db -- --ignored
//! docker compose down
//! ```
//!
//! All tests are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing
)]

use std::time::Duration;

use brainwaves_db::{
    DbError, PostgresConfig, PostgresPool, RedisSeriesCache, RetryPolicy, SampleSink,
    SampleStore, SeriesCache, TokioSleeper,
};
use brainwaves_types::{RangeBound, RunId, Sample};
use chrono::{DateTime, Utc};

/// Redis connection URL for the local Docker instance.
const REDIS_URL: &str = "redis://localhost:6379";

fn postgres_config() -> PostgresConfig {
    PostgresConfig::new("localhost", "brainwaves", "myuser", "mypassword")
}

/// A key or table name no other test run will collide with.
fn unique(prefix: &str) -> String {
    format!("{prefix}_{}", RunId::new().into_inner().simple())
}

// =============================================================================
// Helpers
// =============================================================================

async fn setup_redis() -> RedisSeriesCache {
    RedisSeriesCache::connect(REDIS_URL)
        .await
        .expect("Failed to connect to Redis -- is Docker running?")
}

async fn setup_postgres() -> PostgresPool {
    PostgresPool::bootstrap(
        &postgres_config(),
        &RetryPolicy::fixed(3, Duration::from_secs(1)),
        &TokioSleeper,
    )
    .await
    .expect("Failed to connect to PostgreSQL -- is Docker running?")
}

async fn drop_table(pool: &PostgresPool, table: &str) {
    sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(pool.pool())
        .await
        .expect("Failed to drop test table");
}

// =============================================================================
// RedisTimeSeries Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires live Redis Stack instance (docker compose up -d)"]
async fn redis_write_then_full_range_read() {
    let cache = setup_redis().await;
    let key = unique("it_series");
    let samples = vec![
        Sample::new(0, 1.5),
        Sample::new(1000, 2.5),
        Sample::new(2000, 3.5),
    ];

    cache.create_series(&key, 600_000).await.expect("TS.CREATE");
    let written = cache.append_all(&key, &samples).await.expect("TS.ADD");
    assert_eq!(written, 3);

    let read = cache
        .read_range(&key, RangeBound::Earliest, RangeBound::Latest)
        .await
        .expect("TS.RANGE");
    assert_eq!(read, samples);

    let bounded = cache
        .read_range(&key, RangeBound::At(1000), RangeBound::Latest)
        .await
        .expect("TS.RANGE bounded");
    assert_eq!(bounded.len(), 2);

    assert!(cache.delete(&key).await.expect("DEL"));
    cache.quit().await.expect("QUIT");
}

#[tokio::test]
#[ignore = "requires live Redis Stack instance (docker compose up -d)"]
async fn redis_append_all_spans_pipeline_chunks() {
    let cache = setup_redis().await;
    let key = unique("it_series");
    let samples: Vec<Sample> = (0..2500_i32)
        .map(|i| Sample::new(i64::from(i) * 4, f64::from(i) / 8.0))
        .collect();

    cache.create_series(&key, 0).await.expect("TS.CREATE");
    let written = cache.append_all(&key, &samples).await.expect("TS.ADD");
    assert_eq!(written, 2500);

    let read = cache
        .read_range(&key, RangeBound::Earliest, RangeBound::Latest)
        .await
        .expect("TS.RANGE");
    assert_eq!(read, samples);

    assert!(cache.delete(&key).await.expect("DEL"));
}

#[tokio::test]
#[ignore = "requires live Redis Stack instance (docker compose up -d)"]
async fn redis_create_existing_key_fails() {
    let cache = setup_redis().await;
    let key = unique("it_series");

    cache.create_series(&key, 0).await.expect("first TS.CREATE");
    let err = cache.create_series(&key, 0).await.unwrap_err();
    assert!(matches!(err, DbError::Redis(_)));

    cache.delete(&key).await.expect("DEL");
}

#[tokio::test]
#[ignore = "requires live Redis Stack instance (docker compose up -d)"]
async fn redis_retention_trims_old_samples() {
    let cache = setup_redis().await;
    let key = unique("it_series");

    cache.create_series(&key, 1000).await.expect("TS.CREATE");
    for ts in [0, 500, 1000, 1500, 2500] {
        cache.append(&key, Sample::new(ts, 1.0)).await.expect("TS.ADD");
    }

    let kept: Vec<i64> = cache
        .read_range(&key, RangeBound::Earliest, RangeBound::Latest)
        .await
        .expect("TS.RANGE")
        .iter()
        .map(|s| s.timestamp_ms)
        .collect();
    assert_eq!(kept, vec![1500, 2500]);

    cache.delete(&key).await.expect("DEL");
}

#[tokio::test]
#[ignore = "requires live Redis Stack instance (docker compose up -d)"]
async fn redis_read_after_delete_is_empty() {
    let cache = setup_redis().await;
    let key = unique("it_series");

    cache.create_series(&key, 0).await.expect("TS.CREATE");
    cache.append(&key, Sample::new(0, 1.0)).await.expect("TS.ADD");
    assert!(cache.delete(&key).await.expect("DEL"));
    assert!(!cache.delete(&key).await.expect("second DEL"));

    let read = cache
        .read_range(&key, RangeBound::Earliest, RangeBound::Latest)
        .await
        .expect("read of missing key");
    assert!(read.is_empty());
}

// =============================================================================
// PostgreSQL / TimescaleDB Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires live TimescaleDB instance (docker compose up -d)"]
async fn postgres_ensure_schema_is_idempotent() {
    let pool = setup_postgres().await;
    let table = unique("it_eeg");
    let store = SampleStore::new(pool.pool().clone(), &table).expect("valid table");

    store.ensure_schema().await.expect("first ensure_schema");
    store.ensure_schema().await.expect("second ensure_schema");
    assert_eq!(store.count_rows().await.expect("COUNT"), 0);

    drop_table(&pool, store.table()).await;
    pool.close().await;
}

#[tokio::test]
#[ignore = "requires live TimescaleDB instance (docker compose up -d)"]
async fn postgres_bulk_insert_writes_every_row() {
    let pool = setup_postgres().await;
    let table = unique("it_eeg");
    let store = SampleStore::new(pool.pool().clone(), &table)
        .expect("valid table")
        .with_batch_size(2);
    store.ensure_schema().await.expect("ensure_schema");

    let samples = vec![
        Sample::new(0, 1.5),
        Sample::new(1000, 2.5),
        Sample::new(2000, 3.5),
    ];
    let inserted = store.bulk_insert(&samples).await.expect("bulk_insert");
    assert_eq!(inserted, 3);
    assert_eq!(store.count_rows().await.expect("COUNT"), 3);

    let times: Vec<DateTime<Utc>> =
        sqlx::query_scalar(&format!("SELECT time FROM {table} ORDER BY time"))
            .fetch_all(pool.pool())
            .await
            .expect("SELECT time");
    assert_eq!(times[0], DateTime::from_timestamp(0, 0).unwrap());
    assert_eq!(times[2], DateTime::from_timestamp(2, 0).unwrap());

    drop_table(&pool, store.table()).await;
    pool.close().await;
}

#[tokio::test]
#[ignore = "requires live TimescaleDB instance (docker compose up -d)"]
async fn postgres_bulk_insert_is_atomic() {
    let pool = setup_postgres().await;
    let table = unique("it_eeg");
    let store = SampleStore::new(pool.pool().clone(), &table).expect("valid table");
    store.ensure_schema().await.expect("ensure_schema");

    let batch = [
        Sample::new(0, 1.0),
        Sample::new(i64::MAX, 2.0),
        Sample::new(2000, 3.0),
    ];
    let err = store.bulk_insert(&batch).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidRecord(_)));
    assert_eq!(store.count_rows().await.expect("COUNT"), 0);

    drop_table(&pool, store.table()).await;
    pool.close().await;
}

#[tokio::test]
#[ignore = "requires live TimescaleDB instance (docker compose up -d)"]
async fn postgres_failed_chunk_rolls_back_earlier_chunks() {
    let pool = setup_postgres().await;
    let table = unique("it_eeg");
    let store = SampleStore::new(pool.pool().clone(), &table)
        .expect("valid table")
        .with_batch_size(1);
    store.ensure_schema().await.expect("ensure_schema");

    // Representable as a chrono timestamp (about 7500 BC) but below the
    // TIMESTAMPTZ range, so the third statement fails inside the transaction.
    let batch = [
        Sample::new(0, 1.0),
        Sample::new(1000, 2.0),
        Sample::new(-300_000_000_000_000, 3.0),
    ];
    let err = store.bulk_insert(&batch).await.unwrap_err();
    assert!(matches!(err, DbError::Postgres(_)));
    assert_eq!(store.count_rows().await.expect("COUNT"), 0);

    drop_table(&pool, store.table()).await;
    pool.close().await;
}
