//! Patches pushed to live stream subscribers.
//!
//! Each variant serializes to one self-contained JSON object with a `type`
//! tag, so an SSE client can apply it without reading anything else.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Job, JobId, JobStatus, LogEntry, QueueStatus};

/// Stream message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Full job state, sent first on every per-job stream
    Snapshot { job: Box<Job> },

    /// Status or progress changed
    JobUpdated {
        #[serde(rename = "jobId")]
        job_id: JobId,
        status: JobStatus,
        progress: u8,
        #[serde(rename = "currentStep", skip_serializing_if = "Option::is_none")]
        current_step: Option<String>,
        #[serde(rename = "videoUrl", skip_serializing_if = "Option::is_none")]
        video_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A log line was appended
    Log {
        #[serde(rename = "jobId")]
        job_id: JobId,
        entry: LogEntry,
    },

    /// Queue counters (global streams only)
    QueueStatus { status: QueueStatus },
}

impl StreamEvent {
    pub fn snapshot(job: &Job) -> Self {
        StreamEvent::Snapshot {
            job: Box::new(job.clone()),
        }
    }

    /// Status/progress patch built from the job's current state.
    pub fn job_updated(job: &Job) -> Self {
        StreamEvent::JobUpdated {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            current_step: job.current_step.clone(),
            video_url: job.video_url.clone(),
            error: job.error.clone(),
            timestamp: job.updated_at,
        }
    }

    pub fn log(job_id: &JobId, entry: LogEntry) -> Self {
        StreamEvent::Log {
            job_id: job_id.clone(),
            entry,
        }
    }

    pub fn queue_status(status: QueueStatus) -> Self {
        StreamEvent::QueueStatus { status }
    }

    /// Job this event belongs to, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            StreamEvent::Snapshot { job } => Some(&job.id),
            StreamEvent::JobUpdated { job_id, .. } | StreamEvent::Log { job_id, .. } => Some(job_id),
            StreamEvent::QueueStatus { .. } => None,
        }
    }

    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Snapshot { .. } => "snapshot",
            StreamEvent::JobUpdated { .. } => "job_updated",
            StreamEvent::Log { .. } => "log",
            StreamEvent::QueueStatus { .. } => "queue_status",
        }
    }

    /// True for the last patch a per-job stream will ever carry.
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Snapshot { job } => job.is_terminal(),
            StreamEvent::JobUpdated { status, .. } => status.is_terminal(),
            _ => false,
        }
    }
}
