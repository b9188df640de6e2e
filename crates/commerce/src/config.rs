//! Engine configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use fulfillment::{DEFAULT_CURRENCY, RetryPolicy};
use storage::CacheTtls;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Engine configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: PostgreSQL connection string (default: unset, in-memory store)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `CACHE_ENABLED`: use the moka cache (default: `true`)
/// - `CACHE_MAX_CAPACITY`: maximum cached entries (default: `10000`)
/// - `CACHE_TTL_SECS`: TTL for products, categories, users and orders (default: `1800`)
/// - `CACHE_VOLATILE_TTL_SECS`: TTL for carts and payments (default: `900`)
/// - `DEFAULT_CURRENCY`: currency recorded on payments (default: `"USD"`)
/// - `NOTIFY_MAX_ATTEMPTS`: delivery attempts per notification (default: `3`)
/// - `NOTIFY_BACKOFF_MS`: first retry delay, doubled per attempt (default: `200`)
/// - `LOG_FORMAT`: `"pretty"` or `"json"` (default: `"pretty"`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `METRICS_ADDR`: Prometheus listener address (default: unset, no exporter)
///
/// Values that fail to parse fall back to the default.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub cache_enabled: bool,
    pub cache_max_capacity: u64,
    pub cache_ttl: Duration,
    pub cache_volatile_ttl: Duration,
    pub default_currency: String,
    pub notify_max_attempts: u32,
    pub notify_backoff: Duration,
    pub log_format: LogFormat,
    pub log_level: String,
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let parsed = |name: &str| non_empty(name).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: non_empty("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.database_max_connections),
            cache_enabled: non_empty("CACHE_ENABLED")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.cache_enabled),
            cache_max_capacity: parsed("CACHE_MAX_CAPACITY")
                .unwrap_or(defaults.cache_max_capacity),
            cache_ttl: parsed("CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_volatile_ttl: parsed("CACHE_VOLATILE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_volatile_ttl),
            default_currency: non_empty("DEFAULT_CURRENCY")
                .map(|v| v.trim().to_ascii_uppercase())
                .unwrap_or(defaults.default_currency),
            notify_max_attempts: non_empty("NOTIFY_MAX_ATTEMPTS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.notify_max_attempts),
            notify_backoff: parsed("NOTIFY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.notify_backoff),
            log_format: non_empty("LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_format),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            metrics_addr: non_empty("METRICS_ADDR").and_then(|v| v.trim().parse().ok()),
        }
    }

    pub fn cache_ttls(&self) -> CacheTtls {
        CacheTtls {
            stable: self.cache_ttl,
            volatile: self.cache_volatile_ttl,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.notify_max_attempts,
            initial_backoff: self.notify_backoff,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        let ttls = CacheTtls::default();
        let retry = RetryPolicy::default();
        Self {
            database_url: None,
            database_max_connections: 10,
            cache_enabled: true,
            cache_max_capacity: 10_000,
            cache_ttl: ttls.stable,
            cache_volatile_ttl: ttls.volatile,
            default_currency: DEFAULT_CURRENCY.to_string(),
            notify_max_attempts: retry.max_attempts,
            notify_backoff: retry.initial_backoff,
            log_format: LogFormat::Pretty,
            log_level: "info".to_string(),
            metrics_addr: None,
        }
    }
}
