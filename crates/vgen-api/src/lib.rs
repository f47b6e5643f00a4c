//! Axum HTTP API server for the vgen job scheduler.
//!
//! This crate provides:
//! - Job submission, inspection, cancellation, retry and deletion
//! - Webhook endpoints for step events and render results
//! - Server-sent event streams per job and for the whole queue
//! - Subscriber management for outbound notifications
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::QueueReporter;
pub use state::AppState;
