//! Job store error types.

use thiserror::Error;
use vgen_models::TransitionError;

/// Result type for job store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rejected: {0}")]
    Rejected(#[from] TransitionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// The state machine refused the change; the job is untouched.
    pub fn is_rejected(&self) -> bool {
        matches!(self, StoreError::Rejected(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Rejection reason, if the state machine refused the change.
    pub fn rejection(&self) -> Option<&TransitionError> {
        match self {
            StoreError::Rejected(e) => Some(e),
            _ => None,
        }
    }
}
