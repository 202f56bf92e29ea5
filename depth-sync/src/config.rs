//! Configuration module for the depth synchronizer

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::error::{DepthSyncError, Result};

/// Wire protocol spoken by the configured endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    /// Combined `<symbol>@<stream>` URLs; books are bootstrapped over REST
    #[default]
    Binance,
    /// `{"op":"subscribe"}` frames; books arrive in-band as `partial` tables
    Okex,
}

impl std::str::FromStr for Venue {
    type Err = DepthSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Ok(Venue::Binance),
            "okex" => Ok(Venue::Okex),
            other => Err(DepthSyncError::ConfigError(format!("unknown venue: {}", other))),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trading symbols to subscribe to (e.g., ["BTCUSDT", "ETHUSDT"])
    pub symbols: Vec<String>,

    pub venue: Venue,

    /// WebSocket endpoint (combined streams are appended as `/stream?streams=`)
    pub ws_endpoint: String,

    /// REST API endpoint for bootstrap snapshots
    pub rest_endpoint: String,

    /// Depth stream suffix (`depth@100ms`) or table channel (`spot/depth`)
    pub depth_stream: String,

    /// Trade stream suffix, e.g. `trade` or `aggTrade`
    pub trade_stream: String,

    /// Number of levels requested from the REST snapshot endpoint
    pub bootstrap_limit: usize,

    /// Bootstrap retry settings
    pub bootstrap_retries: u32,
    pub bootstrap_retry_delay_ms: u64,

    /// Updates held while a bootstrap is outstanding
    pub max_pending_updates: usize,

    /// Levels per side in emitted snapshots (None = full book)
    pub snapshot_depth: Option<usize>,

    /// HTTP client timeout for REST calls
    pub http_timeout_secs: u64,

    /// Reconnection settings (0 attempts = retry forever)
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,

    /// Status log interval in seconds
    pub health_check_interval_secs: u64,

    /// Port of the health/metrics HTTP server
    pub health_port: u16,
}

/// Fixed-delay retry settings for bootstrap snapshot requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let symbols: Vec<String> = env::var("SYMBOLS")
            .unwrap_or_else(|_| "BTCUSDT,ETHUSDT".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let venue = match env::var("VENUE") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.venue,
        };

        Ok(Self {
            symbols,
            venue,
            ws_endpoint: env::var("WS_ENDPOINT").unwrap_or(defaults.ws_endpoint),
            rest_endpoint: env::var("REST_ENDPOINT").unwrap_or(defaults.rest_endpoint),
            depth_stream: env::var("DEPTH_STREAM").unwrap_or(defaults.depth_stream),
            trade_stream: env::var("TRADE_STREAM").unwrap_or(defaults.trade_stream),
            bootstrap_limit: env_or("BOOTSTRAP_LIMIT", defaults.bootstrap_limit),
            bootstrap_retries: env_or("BOOTSTRAP_RETRIES", defaults.bootstrap_retries),
            bootstrap_retry_delay_ms: env_or(
                "BOOTSTRAP_RETRY_DELAY_MS",
                defaults.bootstrap_retry_delay_ms,
            ),
            max_pending_updates: env_or("MAX_PENDING_UPDATES", defaults.max_pending_updates),
            snapshot_depth: env::var("SNAPSHOT_DEPTH").ok().and_then(|v| v.parse().ok()),
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            reconnect_delay_ms: env_or("RECONNECT_DELAY_MS", defaults.reconnect_delay_ms),
            max_reconnect_attempts: env_or(
                "MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            health_check_interval_secs: env_or(
                "HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval_secs,
            ),
            health_port: env_or("HEALTH_PORT", defaults.health_port),
        })
    }

    /// Load configuration from a TOML/JSON/YAML file layered over the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.symbols = config
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .collect();
        Ok(config)
    }

    /// Bootstrap retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.bootstrap_retries.max(1),
            delay: Duration::from_millis(self.bootstrap_retry_delay_ms),
        }
    }

    /// HTTP client timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            venue: Venue::Binance,
            ws_endpoint: "wss://stream.binance.com:9443".to_string(),
            rest_endpoint: "https://api.binance.com/api/v3".to_string(),
            depth_stream: "depth@100ms".to_string(),
            trade_stream: "trade".to_string(),
            bootstrap_limit: 1000,
            bootstrap_retries: 3,
            bootstrap_retry_delay_ms: 1000,
            max_pending_updates: 10_000,
            snapshot_depth: None,
            http_timeout_secs: 10,
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 0,
            health_check_interval_secs: 30,
            health_port: 9090,
        }
    }
}
