//! Application configuration loaded from environment variables.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default values used when a variable is unset.
pub mod defaults {
    pub const BIND_ADDR: &str = "0.0.0.0:8080";
    pub const READ_BUFFER_BYTES: usize = 1024;
    pub const RETRY_AFTER_SECS: u64 = 120;
    pub const WORKERS: usize = 2;
    pub const POLL_INTERVAL_MS: u64 = 100;
    pub const MAX_IDLE_BACKOFF_MS: u64 = 2_000;
    pub const LEASE_SECS: i64 = 300;
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Listen address
    pub bind_addr: SocketAddr,
    /// Base for `Content-Location`; derived from the `Host` header when unset
    pub public_base_url: Option<String>,
    /// Parser read buffer, raised to fit the boundary when smaller
    pub read_buffer_bytes: usize,
    /// Retry hint returned while a job is not terminal
    pub retry_after: Duration,
    /// Executor pool size; 0 disables background execution
    pub workers: usize,
    /// Initial idle backoff for executor workers
    pub poll_interval: Duration,
    /// Idle backoff cap
    pub max_idle_backoff: Duration,
    /// Lease time-to-live recorded on claim
    pub lease_secs: i64,
    /// Failed-row tolerance across a job (unset: per-row failures never fail a job)
    pub max_failed_rows: Option<u64>,
    /// Postgres connection string; in-memory registry when unset
    pub database_url: Option<String>,
    /// Redis connection string for terminal-state cache invalidation
    pub redis_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            public_base_url: None,
            read_buffer_bytes: defaults::READ_BUFFER_BYTES,
            retry_after: Duration::from_secs(defaults::RETRY_AFTER_SECS),
            workers: defaults::WORKERS,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            max_idle_backoff: Duration::from_millis(defaults::MAX_IDLE_BACKOFF_MS),
            lease_secs: defaults::LEASE_SECS,
            max_failed_rows: None,
            database_url: None,
            redis_url: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `IMPORT_BIND_ADDR`: listen address (default: 0.0.0.0:8080)
    /// - `IMPORT_PUBLIC_BASE_URL`: base URL for poll locations
    /// - `IMPORT_READ_BUFFER_BYTES`: parser read buffer (default: 1024)
    /// - `IMPORT_RETRY_AFTER_SECS`: poll retry hint (default: 120)
    /// - `IMPORT_WORKERS`: executor threads (default: 2)
    /// - `IMPORT_POLL_INTERVAL_MS`: initial idle backoff (default: 100)
    /// - `IMPORT_MAX_IDLE_BACKOFF_MS`: idle backoff cap (default: 2000)
    /// - `IMPORT_LEASE_SECS`: lease time-to-live (default: 300)
    /// - `IMPORT_MAX_FAILED_ROWS`: failed-row tolerance (default: unset)
    /// - `DATABASE_URL`: Postgres registry
    /// - `REDIS_URL`: cache invalidation (requires the `redis` feature)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let d = Self::default();

        let bind_addr = parse_or(get("IMPORT_BIND_ADDR"), "IMPORT_BIND_ADDR", d.bind_addr)?;
        let read_buffer_bytes = parse_or(get("IMPORT_READ_BUFFER_BYTES"), "IMPORT_READ_BUFFER_BYTES", d.read_buffer_bytes)?;
        let retry_after_secs = parse_or(get("IMPORT_RETRY_AFTER_SECS"), "IMPORT_RETRY_AFTER_SECS", defaults::RETRY_AFTER_SECS)?;
        let workers = parse_or(get("IMPORT_WORKERS"), "IMPORT_WORKERS", d.workers)?;
        let poll_interval_ms = parse_or(get("IMPORT_POLL_INTERVAL_MS"), "IMPORT_POLL_INTERVAL_MS", defaults::POLL_INTERVAL_MS)?;
        let max_idle_backoff_ms = parse_or(
            get("IMPORT_MAX_IDLE_BACKOFF_MS"),
            "IMPORT_MAX_IDLE_BACKOFF_MS",
            defaults::MAX_IDLE_BACKOFF_MS,
        )?;
        let lease_secs: i64 = parse_or(get("IMPORT_LEASE_SECS"), "IMPORT_LEASE_SECS", d.lease_secs)?;
        let max_failed_rows = match get("IMPORT_MAX_FAILED_ROWS") {
            Some(raw) => Some(parse("IMPORT_MAX_FAILED_ROWS", &raw)?),
            None => None,
        };

        if lease_secs <= 0 {
            return Err(ConfigError::Invalid {
                var: "IMPORT_LEASE_SECS",
                value: lease_secs.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if poll_interval_ms == 0 || max_idle_backoff_ms < poll_interval_ms {
            return Err(ConfigError::Invalid {
                var: "IMPORT_MAX_IDLE_BACKOFF_MS",
                value: max_idle_backoff_ms.to_string(),
                reason: format!("must be at least IMPORT_POLL_INTERVAL_MS ({poll_interval_ms}), which must be positive"),
            });
        }

        Ok(Self {
            bind_addr,
            public_base_url: get("IMPORT_PUBLIC_BASE_URL").map(|url| url.trim_end_matches('/').to_string()),
            read_buffer_bytes,
            retry_after: Duration::from_secs(retry_after_secs),
            workers,
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_idle_backoff: Duration::from_millis(max_idle_backoff_ms),
            lease_secs,
            max_failed_rows,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
        })
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T>(raw: Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => parse(var, &raw),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
