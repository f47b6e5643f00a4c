//! Inbound webhook handlers.
//!
//! The workflow subprocess posts step events and the render service posts
//! render results. Bodies are read raw so the signature can be checked
//! against the exact bytes before parsing.
//!
//! An event that does not fit the job's current state is still answered
//! with 200 and `accepted: false`; the sender has nothing to fix and a
//! non-2xx answer would only trigger redelivery. Unknown job or render ids
//! get 404.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use vgen_models::{JobId, JobStatus, RenderEvent, StepEvent, WebhookPayload};
use vgen_notify::signature::{self, SIGNATURE_HEADER};
use vgen_worker::IngestOutcome;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Answer to every webhook delivery.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub accepted: bool,
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<IngestOutcome> for WebhookResponse {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Rejected { job_id, reason } => Self {
                accepted: false,
                job_id,
                status: None,
                reason: Some(format!("{}: {}", reason.code(), reason)),
            },
            IngestOutcome::Applied(job)
            | IngestOutcome::EnteredRendering(job)
            | IngestOutcome::Finalized(job)
            | IngestOutcome::Noted(job) => Self {
                accepted: true,
                job_id: job.id,
                status: Some(job.status),
                reason: None,
            },
        }
    }
}

/// Reject the body unless it carries a valid signature (when a secret is set).
fn verify_signature(state: &AppState, headers: &HeaderMap, body: &[u8], endpoint: &str) -> ApiResult<()> {
    let Some(secret) = state.config.webhook_secret.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if signature::verify(secret, body, provided) {
        Ok(())
    } else {
        metrics::record_signature_failure(endpoint);
        warn!(endpoint = %endpoint, "Webhook signature rejected");
        Err(ApiError::unauthorized("missing or invalid webhook signature"))
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid webhook payload: {}", e)))
}

async fn ingest(state: &AppState, payload: WebhookPayload) -> ApiResult<Json<WebhookResponse>> {
    let outcome = state.scheduler.ingest(&payload).await?;
    debug!(kind = payload.kind(), accepted = outcome.is_accepted(), "Webhook handled");
    Ok(Json(outcome.into()))
}

/// POST /webhooks
///
/// Either payload shape; step events carry `job_id` and `step_number`,
/// render results carry `render_id` and `status`.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    verify_signature(&state, &headers, &body, "/webhooks")?;
    let payload: WebhookPayload = parse(&body)?;
    ingest(&state, payload).await
}

/// POST /webhooks/step-update
pub async fn step_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    verify_signature(&state, &headers, &body, "/webhooks/step-update")?;
    let event: StepEvent = parse(&body)?;
    ingest(&state, WebhookPayload::Step(event)).await
}

/// POST /webhooks/render-completion
pub async fn render_completion(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    verify_signature(&state, &headers, &body, "/webhooks/render-completion")?;
    let event: RenderEvent = parse(&body)?;
    ingest(&state, WebhookPayload::Render(event)).await
}
