//! Gateway error types.

use axum::extract::ws::Message;
use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Handshake credential missing, invalid or expired.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    /// Inbound payload is not a SUBSCRIBE/UNSUBSCRIBE command.
    #[error("Malformed command: {0:?}")]
    MalformedCommand(String),

    /// Upstream quote fetch failed.
    #[error("Upstream fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session outbound queue is full or closed.
    #[error("Channel send error")]
    ChannelSend,
}

impl From<tokio::sync::mpsc::error::TrySendError<Message>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::TrySendError<Message>) -> Self {
        GatewayError::ChannelSend
    }
}

/// Credential validation failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,

    #[error("credential rejected: {0}")]
    Rejected(String),
}

/// Failure of a single upstream fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Upstream(#[from] external_services::Error),

    #[error("fetch for {symbol} timed out after {timeout_ms} ms")]
    Timeout { symbol: String, timeout_ms: u64 },

    #[error("{0}")]
    Source(String),
}

/// Invalid environment configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
