//! Queue status handler.

use axum::extract::State;
use axum::Json;
use vgen_models::QueueStatus;

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /queue/status
///
/// Job counts by status plus worker pool and render monitor occupancy.
pub async fn get_queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStatus>> {
    Ok(Json(state.scheduler.queue_status().await?))
}
