//! `PostgreSQL` connection pool, configuration and bootstrap.
//!
//! `PostgreSQL` (with `TimescaleDB`) is the durable destination for migrated
//! samples. The database container usually starts alongside the pipeline, so
//! the first connection goes through [`PostgresPool::bootstrap`], which
//! retries according to a [`RetryPolicy`].
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! to avoid requiring a live database at build time.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::error::DbError;
use crate::retry::{RetryPolicy, Sleeper, retry};

/// Default maximum number of connections in the pool.
///
/// The pipeline is strictly sequential, so one connection is all it uses.
const DEFAULT_MAX_CONNECTIONS: u32 = 1;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default `PostgreSQL` port.
const DEFAULT_PORT: u16 = 5432;

/// Configuration for the `PostgreSQL` connection pool.
#[derive(Clone)]
pub struct PostgresConfig {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login role.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Connection timeout for a single attempt.
    pub connect_timeout: Duration,
}

impl core::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl PostgresConfig {
    /// Create a new configuration for the given server and credentials.
    pub fn new(host: &str, database: &str, user: &str, password: &str) -> Self {
        Self {
            host: host.to_owned(),
            port: DEFAULT_PORT,
            database: database.to_owned(),
            user: user.to_owned(),
            password: password.to_owned(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Set the server port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build the `sqlx` connect options for this configuration.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }
}

/// Connection pool handle to `PostgreSQL`.
///
/// Wraps a [`sqlx::PgPool`] and provides access to the sample store.
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Connect to `PostgreSQL` once, using the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the connection fails.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(config.connect_options())
            .await?;

        tracing::info!(
            host = config.host,
            port = config.port,
            database = config.database,
            "Connected to PostgreSQL"
        );

        Ok(Self { pool })
    }

    /// Connect to `PostgreSQL`, retrying failed attempts per `policy`.
    ///
    /// # Errors
    ///
    /// Returns the [`DbError`] of the last attempt once the policy is
    /// exhausted.
    pub async fn bootstrap<S: Sleeper>(
        config: &PostgresConfig,
        policy: &RetryPolicy,
        sleeper: &S,
    ) -> Result<Self, DbError> {
        retry(policy, sleeper, "postgres_connect", |_| Self::connect(config)).await
    }

    /// Wrap an existing pool.
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Return a reference to the underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close all connections in the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}
