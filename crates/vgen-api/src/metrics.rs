//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Install the Prometheus recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vgen_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vgen_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vgen_http_requests_in_flight";

    // Stream metrics
    pub const SSE_CONNECTIONS_TOTAL: &str = "vgen_sse_connections_total";
    pub const SSE_CONNECTIONS_ACTIVE: &str = "vgen_sse_connections_active";
    pub const SSE_EVENTS_SENT: &str = "vgen_sse_events_sent_total";
    pub const SSE_EVENTS_LAGGED: &str = "vgen_sse_events_lagged_total";

    // Webhook metrics
    pub const WEBHOOK_SIGNATURE_FAILURES: &str = "vgen_webhook_signature_failures_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a stream being opened.
pub fn record_sse_connection(endpoint: &'static str) {
    counter!(names::SSE_CONNECTIONS_TOTAL, "endpoint" => endpoint).increment(1);
    gauge!(names::SSE_CONNECTIONS_ACTIVE, "endpoint" => endpoint).increment(1.0);
}

/// Record a stream being closed.
pub fn record_sse_disconnect(endpoint: &'static str) {
    gauge!(names::SSE_CONNECTIONS_ACTIVE, "endpoint" => endpoint).decrement(1.0);
}

pub fn record_sse_event(endpoint: &'static str, event: &'static str) {
    counter!(names::SSE_EVENTS_SENT, "endpoint" => endpoint, "type" => event).increment(1);
}

/// Record events a slow subscriber missed.
pub fn record_sse_lagged(endpoint: &'static str, skipped: u64) {
    counter!(names::SSE_EVENTS_LAGGED, "endpoint" => endpoint).increment(skipped);
}

pub fn record_signature_failure(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WEBHOOK_SIGNATURE_FAILURES, &labels).increment(1);
}

/// Sanitize path for metrics labels (replace ids with placeholders).
fn sanitize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut previous = "";
    for segment in path.split('/') {
        let replaced = match previous {
            "jobs" if !segment.is_empty() => ":job_id",
            "subscribers" if !segment.is_empty() => ":subscriber_id",
            _ => segment,
        };
        out.push(replaced);
        previous = segment;
    }
    out.join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/jobs/550e8400-e29b-41d4-a716-446655440000/stream"),
            "/jobs/:job_id/stream"
        );
        assert_eq!(sanitize_path("/jobs"), "/jobs");
        assert_eq!(sanitize_path("/subscribers/abc"), "/subscribers/:subscriber_id");
        assert_eq!(sanitize_path("/webhooks/step-update"), "/webhooks/step-update");
    }
}
