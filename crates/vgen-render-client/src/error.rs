//! Render client error types.

use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render service not configured")]
    NotConfigured,

    #[error("Render not found: {0}")]
    NotFound(String),

    #[error("Render service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl RenderError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Network failures, 429 and 5xx are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            RenderError::Network(_) => true,
            RenderError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
