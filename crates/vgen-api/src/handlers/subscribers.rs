//! Outbound notification subscriber management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use vgen_notify::{NotificationEvent, Notifier, Subscriber};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request body for `POST /subscribers`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubscriberRequest {
    #[validate(url(message = "url must be an absolute http(s) URL"))]
    pub url: String,
    /// Events to deliver; all when omitted or empty
    #[serde(default)]
    pub events: Vec<NotificationEvent>,
    /// Signing key for this subscriber
    #[validate(length(min = 16, message = "secret must be at least 16 characters"))]
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriberListResponse {
    pub subscribers: Vec<Subscriber>,
    /// Subscribers whose circuit breaker is open
    pub paused: usize,
}

fn notifier(state: &AppState) -> ApiResult<&Notifier> {
    state
        .scheduler
        .notifier()
        .ok_or_else(|| ApiError::Unavailable("notifications are disabled".to_string()))
}

/// POST /subscribers
pub async fn create_subscriber(
    State(state): State<AppState>,
    Json(request): Json<CreateSubscriberRequest>,
) -> ApiResult<(StatusCode, Json<Subscriber>)> {
    request
        .validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let subscriber = notifier(&state)?
        .registry()
        .add(&request.url, request.events, request.secret)?;
    info!(subscriber_id = %subscriber.id, "create_subscriber");
    Ok((StatusCode::CREATED, Json(subscriber)))
}

/// GET /subscribers
pub async fn list_subscribers(State(state): State<AppState>) -> ApiResult<Json<SubscriberListResponse>> {
    let notifier = notifier(&state)?;
    Ok(Json(SubscriberListResponse {
        subscribers: notifier.registry().list(),
        paused: notifier.breakers().open_count(),
    }))
}

/// DELETE /subscribers/:subscriber_id
pub async fn delete_subscriber(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
) -> ApiResult<StatusCode> {
    notifier(&state)?.unsubscribe(&subscriber_id)?;
    info!(subscriber_id = %subscriber_id, "delete_subscriber");
    Ok(StatusCode::NO_CONTENT)
}
