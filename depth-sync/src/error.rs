//! Error types for depth synchronization

use thiserror::Error;

/// Depth synchronization errors
#[derive(Error, Debug, Clone)]
pub enum DepthSyncError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("REST API error: {0}")]
    RestApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Sequence gap: expected previous {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("Bootstrap snapshot for {symbol} failed after {attempts} attempts: {reason}")]
    BootstrapFailed {
        symbol: String,
        attempts: u32,
        reason: String,
    },

    #[error("Symbol already subscribed: {0}")]
    AlreadySubscribed(String),

    #[error("Resubscription required for: {0:?}")]
    ResubscribeRequired(Vec<String>),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Max reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

impl From<tokio_tungstenite::tungstenite::Error> for DepthSyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        DepthSyncError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for DepthSyncError {
    fn from(err: serde_json::Error) -> Self {
        DepthSyncError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for DepthSyncError {
    fn from(err: reqwest::Error) -> Self {
        DepthSyncError::RestApiError(err.to_string())
    }
}

impl From<config::ConfigError> for DepthSyncError {
    fn from(err: config::ConfigError) -> Self {
        DepthSyncError::ConfigError(err.to_string())
    }
}

impl From<prometheus::Error> for DepthSyncError {
    fn from(err: prometheus::Error) -> Self {
        DepthSyncError::MetricsError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DepthSyncError>;
