//! Configuration loading and typed config structures for the migration.
//!
//! Configuration lives in an optional `brainwaves-config.yaml`. Every field
//! has a default, so an absent file or an empty document yields a runnable
//! configuration pointing at local services. Deployment-specific values
//! (hosts, credentials, the recording path) are then overridden from the
//! environment through [`MigrationConfig::apply_overrides`].
//!
//! The config is built once in `main` and handed to components as values;
//! nothing below this module reads the environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use brainwaves_db::{PostgresConfig, RetryPolicy, validate_table_name};
use serde::Deserialize;

use crate::pipeline::PipelineSettings;
use crate::source::ChannelSelector;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidOverride {
        /// The environment variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level migration configuration.
///
/// Mirrors the structure of `brainwaves-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MigrationConfig {
    /// Destination database.
    #[serde(default)]
    pub postgres: PostgresSettings,

    /// Staging cache.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Connection bootstrap retry policy.
    #[serde(default)]
    pub bootstrap: BootstrapSettings,

    /// Recording to migrate.
    #[serde(default)]
    pub source: SourceSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MigrationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment overrides are not applied; call
    /// [`MigrationConfig::apply_overrides`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Override fields from environment-style variables.
    ///
    /// `lookup` maps a variable name to its value; pass
    /// `|name| std::env::var(name).ok()` for the process environment.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `POSTGRES_HOST` | `postgres.host` |
    /// | `POSTGRES_PORT` | `postgres.port` |
    /// | `POSTGRES_DB` | `postgres.database` |
    /// | `POSTGRES_USER` | `postgres.user` |
    /// | `POSTGRES_PASSWORD` | `postgres.password` |
    /// | `POSTGRES_TABLE` | `postgres.table` |
    /// | `REDIS_HOST` | `cache.host` |
    /// | `REDIS_PORT` | `cache.port` |
    /// | `SERIES_KEY` | `cache.series_key` |
    /// | `SERIES_RETENTION_MS` | `cache.retention_ms` |
    /// | `RECORDING_PATH` | `source.path` |
    /// | `RECORDING_CHANNEL` | `source.channel` |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] if a numeric variable does
    /// not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("POSTGRES_HOST") {
            self.postgres.host = val;
        }
        if let Some(val) = lookup("POSTGRES_PORT") {
            self.postgres.port = parse_override("POSTGRES_PORT", val)?;
        }
        if let Some(val) = lookup("POSTGRES_DB") {
            self.postgres.database = val;
        }
        if let Some(val) = lookup("POSTGRES_USER") {
            self.postgres.user = val;
        }
        if let Some(val) = lookup("POSTGRES_PASSWORD") {
            self.postgres.password = val;
        }
        if let Some(val) = lookup("POSTGRES_TABLE") {
            self.postgres.table = val;
        }
        if let Some(val) = lookup("REDIS_HOST") {
            self.cache.host = val;
        }
        if let Some(val) = lookup("REDIS_PORT") {
            self.cache.port = parse_override("REDIS_PORT", val)?;
        }
        if let Some(val) = lookup("SERIES_KEY") {
            self.cache.series_key = val;
        }
        if let Some(val) = lookup("SERIES_RETENTION_MS") {
            self.cache.retention_ms = parse_override("SERIES_RETENTION_MS", val)?;
        }
        if let Some(val) = lookup("RECORDING_PATH") {
            self.source.path = PathBuf::from(val);
        }
        if let Some(val) = lookup("RECORDING_CHANNEL") {
            self.source.channel = ChannelSelector::parse(&val);
        }
        Ok(())
    }

    /// Check the values that cannot be validated by deserialization alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_table_name(&self.postgres.table)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.postgres.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "postgres.batch_size must be at least 1".to_owned(),
            ));
        }
        if self.cache.series_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "cache.series_key must not be empty".to_owned(),
            ));
        }
        if self.postgres.port == 0 || self.cache.port == 0 {
            return Err(ConfigError::Invalid("ports must be non-zero".to_owned()));
        }
        Ok(())
    }

    /// Settings for the pipeline driver.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            series_key: self.cache.series_key.clone(),
            retention_ms: self.cache.retention_ms,
            clear_stale_series: self.cache.clear_stale_series,
        }
    }
}

fn parse_override<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    let parsed = value.trim().parse::<T>();
    parsed.map_err(|e| ConfigError::InvalidOverride {
        var,
        reason: e.to_string(),
        value,
    })
}

/// Destination database settings.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct PostgresSettings {
    /// Server host name.
    #[serde(default = "default_postgres_host")]
    pub host: String,

    /// Server port.
    #[serde(default = "default_postgres_port")]
    pub port: u16,

    /// Database name.
    #[serde(default = "default_postgres_database")]
    pub database: String,

    /// Login role.
    #[serde(default = "default_postgres_user")]
    pub user: String,

    /// Login password.
    #[serde(default = "default_postgres_password")]
    pub password: String,

    /// Destination hypertable.
    #[serde(default = "default_table")]
    pub table: String,

    /// Rows per insert statement inside the single transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timeout for one connection attempt, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl PostgresSettings {
    /// Connection configuration for [`brainwaves_db::PostgresPool`].
    pub fn connection_config(&self) -> PostgresConfig {
        PostgresConfig::new(&self.host, &self.database, &self.user, &self.password)
            .with_port(self.port)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}

impl core::fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("table", &self.table)
            .field("batch_size", &self.batch_size)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: default_postgres_host(),
            port: default_postgres_port(),
            database: default_postgres_database(),
            user: default_postgres_user(),
            password: default_postgres_password(),
            table: default_table(),
            batch_size: default_batch_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Staging cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheSettings {
    /// Redis host name.
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis port.
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Series key the recording is staged under.
    #[serde(default = "default_series_key")]
    pub series_key: String,

    /// Retention window in milliseconds, measured from the newest sample.
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,

    /// Delete a leftover series key from an earlier failed run before
    /// creating it again.
    #[serde(default)]
    pub clear_stale_series: bool,
}

impl CacheSettings {
    /// Redis connection URL.
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            series_key: default_series_key(),
            retention_ms: default_retention_ms(),
            clear_stale_series: false,
        }
    }
}

/// Connection bootstrap settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BootstrapSettings {
    /// Total connection attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts, in seconds.
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

impl BootstrapSettings {
    /// The retry policy these settings describe.
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_secs(self.delay_secs))
    }
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

/// Recording settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceSettings {
    /// Path to the recording export (`.csv` or `.json`).
    #[serde(default = "default_recording_path")]
    pub path: PathBuf,

    /// Channel to migrate, by index or by name.
    #[serde(default)]
    pub channel: ChannelSelector,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            path: default_recording_path(),
            channel: ChannelSelector::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_postgres_host() -> String {
    "localhost".to_owned()
}

const fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "brainwaves".to_owned()
}

fn default_postgres_user() -> String {
    "myuser".to_owned()
}

fn default_postgres_password() -> String {
    "mypassword".to_owned()
}

fn default_table() -> String {
    brainwaves_db::sample_store::DEFAULT_TABLE.to_owned()
}

const fn default_batch_size() -> usize {
    brainwaves_db::sample_store::DEFAULT_BATCH_SIZE
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_redis_host() -> String {
    "localhost".to_owned()
}

const fn default_redis_port() -> u16 {
    6379
}

fn default_series_key() -> String {
    "eeg_series".to_owned()
}

const fn default_retention_ms() -> u64 {
    600_000
}

const fn default_max_attempts() -> u32 {
    brainwaves_db::retry::DEFAULT_MAX_ATTEMPTS
}

const fn default_delay_secs() -> u64 {
    brainwaves_db::retry::DEFAULT_DELAY_SECS
}

fn default_recording_path() -> PathBuf {
    PathBuf::from("sample_audvis_raw.csv")
}

fn default_log_level() -> String {
    "info".to_owned()
}
