//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use outbox::PublisherConfig;
use resilience::{CircuitBreakerConfig, RetryPolicy};
use twopc::CoordinatorConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `CB_FAILURE_THRESHOLD` (default: `5`)
/// - `CB_RECOVERY_TIMEOUT_SECONDS` (default: `30`)
/// - `OUTBOX_FLUSH_INTERVAL_SECONDS` (default: `1`)
/// - `OUTBOX_BATCH_SIZE` (default: `100`)
/// - `OUTBOX_PROCESSED_RETENTION_SECONDS` (default: `86400`)
/// - `SAGA_RETENTION_SECONDS`: how long finished sagas stay queryable;
///   `0` keeps them indefinitely (default: `86400`)
/// - `TRANSACTION_TIMEOUT_SECONDS` (default: `30`)
/// - `TRANSACTION_COMMIT_RETRIES` (default: `0`)
/// - `TRANSACTION_ARCHIVE_CAPACITY`: finished transactions kept (default: `1000`)
/// - `RETRY_MAX_ATTEMPTS` (default: `3`)
/// - `RETRY_BASE_DELAY_MS` (default: `1000`)
/// - `RETRY_MAX_DELAY_MS` (default: `10000`)
/// - `DATABASE_URL`: PostgreSQL store; the in-memory store is used when unset
///
/// Unparseable values fall back to the default. Zero is not accepted for the
/// outbox flush interval and batch size; those are raised to 1.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub cb_failure_threshold: u32,
    pub cb_recovery_timeout: Duration,
    pub outbox_flush_interval: Duration,
    pub outbox_batch_size: usize,
    pub outbox_processed_retention: Duration,
    pub saga_retention: Option<Duration>,
    pub transaction_timeout: Duration,
    pub transaction_commit_retries: u32,
    pub transaction_archive_capacity: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub database_url: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env_or = |key: &str, default: u64| -> u64 { parse_or(lookup(key), default) };
        let d = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(d.host),
            port: parse_or(lookup("PORT"), d.port),
            log_level: lookup("RUST_LOG").unwrap_or(d.log_level),
            cb_failure_threshold: parse_or(
                lookup("CB_FAILURE_THRESHOLD"),
                d.cb_failure_threshold,
            ),
            cb_recovery_timeout: Duration::from_secs(env_or(
                "CB_RECOVERY_TIMEOUT_SECONDS",
                d.cb_recovery_timeout.as_secs(),
            )),
            outbox_flush_interval: Duration::from_secs(
                env_or(
                    "OUTBOX_FLUSH_INTERVAL_SECONDS",
                    d.outbox_flush_interval.as_secs(),
                )
                .max(1),
            ),
            outbox_batch_size: parse_or(lookup("OUTBOX_BATCH_SIZE"), d.outbox_batch_size).max(1),
            outbox_processed_retention: Duration::from_secs(env_or(
                "OUTBOX_PROCESSED_RETENTION_SECONDS",
                d.outbox_processed_retention.as_secs(),
            )),
            saga_retention: match env_or(
                "SAGA_RETENTION_SECONDS",
                d.saga_retention.map_or(0, |ttl| ttl.as_secs()),
            ) {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            transaction_timeout: Duration::from_secs(env_or(
                "TRANSACTION_TIMEOUT_SECONDS",
                d.transaction_timeout.as_secs(),
            )),
            transaction_commit_retries: parse_or(
                lookup("TRANSACTION_COMMIT_RETRIES"),
                d.transaction_commit_retries,
            ),
            transaction_archive_capacity: parse_or(
                lookup("TRANSACTION_ARCHIVE_CAPACITY"),
                d.transaction_archive_capacity,
            ),
            retry_max_attempts: parse_or(lookup("RETRY_MAX_ATTEMPTS"), d.retry_max_attempts),
            retry_base_delay: Duration::from_millis(env_or(
                "RETRY_BASE_DELAY_MS",
                d.retry_base_delay.as_millis() as u64,
            )),
            retry_max_delay: Duration::from_millis(env_or(
                "RETRY_MAX_DELAY_MS",
                d.retry_max_delay.as_millis() as u64,
            )),
            database_url: lookup("DATABASE_URL").filter(|u| !u.is_empty()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.cb_failure_threshold,
            recovery_timeout: self.cb_recovery_timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            ..RetryPolicy::default()
        }
    }

    pub fn publisher(&self) -> PublisherConfig {
        PublisherConfig {
            flush_interval: self.outbox_flush_interval,
            batch_size: self.outbox_batch_size,
            processed_retention: self.outbox_processed_retention,
        }
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            transaction_timeout: self.transaction_timeout,
            commit_retries: self.transaction_commit_retries,
            archive_capacity: self.transaction_archive_capacity,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            cb_failure_threshold: 5,
            cb_recovery_timeout: Duration::from_secs(30),
            outbox_flush_interval: Duration::from_secs(1),
            outbox_batch_size: 100,
            outbox_processed_retention: Duration::from_secs(86_400),
            saga_retention: Some(Duration::from_secs(86_400)),
            transaction_timeout: Duration::from_secs(30),
            transaction_commit_retries: 0,
            transaction_archive_capacity: 1000,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(10_000),
            database_url: None,
        }
    }
}
