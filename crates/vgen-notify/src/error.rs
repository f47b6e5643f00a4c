//! Notification error types.

use thiserror::Error;

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid subscriber URL: {0}")]
    InvalidUrl(String),

    #[error("Subscriber not found: {0}")]
    SubscriberNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Subscriber returned HTTP {0}")]
    HttpStatus(u16),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NotifyError {
    pub fn invalid_url(msg: impl Into<String>) -> Self {
        Self::InvalidUrl(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
