use std::env;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::dispatch::{DispatchConfig, UpstreamConfig};
use crate::error::{Result, RotorError};
use crate::keys::{KeyPoolConfig, RateLimitConfig};
use crate::proxies::HealthCheckConfig;

/// Engine configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Initial API key list
    pub keys: Vec<String>,
    /// Cooldown/disable thresholds
    pub key_pool: KeyPoolConfig,
    /// Per-key admission bucket sizing
    pub rate_limit: RateLimitConfig,
    /// Retry budget, per-attempt timeout, proxy toggle
    pub dispatch: DispatchConfig,
    /// Upstream base URL and auth header
    pub upstream: UpstreamConfig,
    /// Proxy health checking
    pub health: HealthCheckConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let keys: Vec<String> = get_env_or("ROTOR_API_KEYS", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            keys,
            key_pool: KeyPoolConfig {
                max_failures: parse_env("ROTOR_MAX_FAILURES", "3")?,
                cooldown: Duration::from_secs(parse_env("ROTOR_COOLDOWN_SECONDS", "300")?),
            },
            rate_limit: RateLimitConfig {
                capacity: parse_env("ROTOR_RATE_LIMIT_CAPACITY", "10")?,
                refill_per_second: parse_env("ROTOR_RATE_LIMIT_REFILL", "1.0")?,
            },
            dispatch: DispatchConfig {
                max_retries: parse_env("ROTOR_MAX_RETRIES", "3")?,
                attempt_timeout: Duration::from_secs(parse_env("ROTOR_ATTEMPT_TIMEOUT", "30")?),
                proxy_enabled: parse_env("ROTOR_PROXY_ENABLED", "false")?,
            },
            upstream: UpstreamConfig {
                base_url: get_env_or("ROTOR_UPSTREAM_URL", "http://localhost"),
                auth_header: get_env_or("ROTOR_AUTH_HEADER", "x-api-key"),
                connect_timeout: Duration::from_secs(parse_env("ROTOR_CONNECT_TIMEOUT", "10")?),
            },
            health: HealthCheckConfig {
                target_url: get_env_or(
                    "ROTOR_HEALTHCHECK_URL",
                    "http://www.gstatic.com/generate_204",
                ),
                interval: Duration::from_secs(parse_env("ROTOR_HEALTHCHECK_INTERVAL", "300")?),
                timeout: Duration::from_secs(parse_env("ROTOR_HEALTHCHECK_TIMEOUT", "10")?),
                workers: parse_env("ROTOR_HEALTHCHECK_WORKERS", "10")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }
}

/// Initialize tracing for the embedding process.
pub fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rotor={}", log.level).into());

    if log.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to a default when unset.
/// A set-but-unparsable value is a configuration error, never a silent
/// fallback.
fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    let raw = get_env_or(key, default);
    raw.parse()
        .map_err(|_| RotorError::InvalidConfig(format!("{key} has invalid value {raw:?}")))
}
