//! Scheduler error types.

use thiserror::Error;
use vgen_models::TransitionError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Failed to start workflow: {0}")]
    SpawnFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    Store(vgen_store::StoreError),

    #[error("Notification error: {0}")]
    Notify(#[from] vgen_notify::NotifyError),

    #[error("Render service error: {0}")]
    Render(#[from] vgen_render_client::RenderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

impl From<vgen_store::StoreError> for WorkerError {
    fn from(e: vgen_store::StoreError) -> Self {
        use vgen_store::StoreError;
        match e {
            StoreError::NotFound(id) => WorkerError::NotFound(id),
            StoreError::Conflict(msg) => WorkerError::Conflict(msg),
            StoreError::Rejected(reason) => WorkerError::Conflict(reason.to_string()),
            other => WorkerError::Store(other),
        }
    }
}

impl From<TransitionError> for WorkerError {
    fn from(e: TransitionError) -> Self {
        WorkerError::Conflict(e.to_string())
    }
}
