//! Job handlers.
//!
//! Provides REST API endpoints for:
//! - Submitting, listing and inspecting jobs
//! - Cancelling, retrying and deleting jobs

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vgen_models::{Job, JobId, JobStatus};
use vgen_store::{JobFilter, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

/// Request body for `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// Opaque generation configuration, passed to the workflow as-is
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub job: Job,
}

/// Query parameters for `GET /jobs`.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub count: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Query parameters for `GET /jobs/:job_id`.
#[derive(Debug, Deserialize)]
pub struct GetJobQuery {
    #[serde(default = "default_include_logs")]
    pub include_logs: bool,
}

fn default_include_logs() -> bool {
    true
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /jobs
///
/// Returns 201 with the job as it stands after admission: `active` when a
/// worker slot was free, `pending` otherwise.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let job = state.scheduler.submit(request.parameters).await?;
    info!(job_id = %job.id, status = %job.status, "submit_job");

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id: job.id.clone(),
            status: job.status,
            job,
        }),
    ))
}

/// GET /jobs
///
/// Newest first. `limit` defaults to 50 and is capped at 500.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<JobStatus>().map_err(ApiError::bad_request)?),
        None => None,
    };
    let filter = JobFilter {
        status,
        limit: query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT),
        offset: query.offset.unwrap_or(0),
    };

    let jobs = state.scheduler.list(&filter).await?;
    Ok(Json(JobListResponse {
        count: jobs.len(),
        jobs,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

/// GET /jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<GetJobQuery>,
) -> ApiResult<Json<Job>> {
    let mut job = state.scheduler.get(&JobId::from(job_id)).await?;
    if !query.include_logs {
        job.logs.clear();
    }
    Ok(Json(job))
}

/// POST /jobs/:job_id/cancel
///
/// 409 unless the job is `pending` or `active`.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state.scheduler.cancel(&JobId::from(job_id)).await?;
    info!(job_id = %job.id, "cancel_job");
    Ok(Json(job))
}

/// POST /jobs/:job_id/retry
///
/// Submits the parameters of a failed or cancelled job as a new job.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let job = state.scheduler.retry(&JobId::from(job_id.as_str())).await?;
    info!(job_id = %job.id, retry_of = %job_id, "retry_job");

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id: job.id.clone(),
            status: job.status,
            job,
        }),
    ))
}

/// DELETE /jobs/:job_id
///
/// Terminal jobs only.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    let job = state.scheduler.delete(&JobId::from(job_id)).await?;
    info!(job_id = %job.id, "delete_job");
    Ok(StatusCode::NO_CONTENT)
}
