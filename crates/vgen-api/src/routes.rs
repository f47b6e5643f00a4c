//! API routes.

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::jobs::{cancel_job, delete_job, get_job, list_jobs, retry_job, submit_job};
use crate::handlers::queue::get_queue_status;
use crate::handlers::streams::{job_stream, queue_stream};
use crate::handlers::subscribers::{create_subscriber, delete_subscriber, list_subscribers};
use crate::handlers::webhooks::{receive_webhook, render_completion, step_update};
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let job_routes = Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job).delete(delete_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/jobs/:job_id/retry", post(retry_job))
        .route("/jobs/:job_id/stream", get(job_stream));

    let queue_routes = Router::new()
        .route("/queue/status", get(get_queue_status))
        .route("/queue/status/stream", get(queue_stream));

    let webhook_routes = Router::new()
        .route("/webhooks", post(receive_webhook))
        .route("/webhooks/step-update", post(step_update))
        .route("/webhooks/render-completion", post(render_completion));

    let subscriber_routes = Router::new()
        .route("/subscribers", post(create_subscriber).get(list_subscribers))
        .route("/subscribers/:subscriber_id", delete(delete_subscriber));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(job_routes)
        .merge(queue_routes)
        .merge(webhook_routes)
        .merge(subscriber_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
