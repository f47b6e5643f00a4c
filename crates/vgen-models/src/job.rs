//! Job record and the pure transition function applied to it.
//!
//! Every mutation of a [`Job`] goes through [`Job::apply`],
//! [`Job::apply_step_event`] or [`Job::push_log`]. None of them perform I/O,
//! so the job store can run them inside its per-job critical section and the
//! tests can run them directly.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::event::{StepEvent, StepState};
use crate::JobStatus;

/// Progress ceiling while the render id is still unknown.
pub const PRE_RENDER_PROGRESS_CAP: u8 = 99;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Info,
    Warn,
    Error,
}

/// One timestamped line in a job's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self::with_level(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::with_level(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_level(LogLevel::Error, message)
    }

    fn with_level(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// A requested state change, carrying the fields that change with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// `pending -> active`
    Admit { worker_id: String },
    /// `active -> rendering`
    StartRendering { render_id: String },
    /// `rendering -> completed`
    Complete { video_url: String },
    /// `active | rendering -> failed`
    Fail { error: String },
    /// `pending | active -> cancelled`
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl Transition {
    /// Status the job ends up in.
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Admit { .. } => JobStatus::Active,
            Transition::StartRendering { .. } => JobStatus::Rendering,
            Transition::Complete { .. } => JobStatus::Completed,
            Transition::Fail { .. } => JobStatus::Failed,
            Transition::Cancel { .. } => JobStatus::Cancelled,
        }
    }
}

/// Why a transition or event was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job is {actual}, expected {expected}")]
    StateMismatch { expected: JobStatus, actual: JobStatus },

    #[error("illegal transition {from} -> {to}")]
    Illegal { from: JobStatus, to: JobStatus },

    #[error("job is {0}, step events are only accepted while active")]
    NotActive(JobStatus),

    #[error("stale event: sequence {sequence} <= last applied {last_applied}")]
    StaleSequence { sequence: u64, last_applied: u64 },

    #[error("render id already recorded as {0}")]
    RenderIdAlreadySet(String),
}

impl TransitionError {
    /// Short machine-readable reason, used in webhook responses and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::StateMismatch { .. } => "state_mismatch",
            TransitionError::Illegal { .. } => "illegal_transition",
            TransitionError::NotActive(_) => "not_active",
            TransitionError::StaleSequence { .. } => "stale_sequence",
            TransitionError::RenderIdAlreadySet(_) => "render_id_already_set",
        }
    }
}

/// A content-generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Current lifecycle status
    pub status: JobStatus,

    /// Caller-supplied generation configuration (opaque here)
    #[serde(default)]
    pub parameters: serde_json::Value,

    /// Progress (0-100), non-decreasing while live
    #[serde(default)]
    pub progress: u8,

    /// Label of the most recent unit of work
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,

    /// Number of internal workflow steps used for progress
    pub total_steps: u32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Worker slot held while active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    /// Correlation id for the external render service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_id: Option<String>,

    /// Final artifact location (completed only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,

    /// Failure reason (failed only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Restart attempts that led to this job
    #[serde(default)]
    pub retry_count: u32,

    /// Sequence of the last applied step event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sequence: Option<u64>,

    /// Append-only log
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(parameters: serde_json::Value, total_steps: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            parameters,
            progress: 0,
            current_step: None,
            total_steps: total_steps.max(1),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            worker_id: None,
            render_id: None,
            video_url: None,
            error: None,
            retry_count: 0,
            last_sequence: None,
            logs: vec![LogEntry::info("Job submitted")],
        }
    }

    /// Set the retry counter (for jobs resubmitted from a failed one).
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append a log entry. Allowed in every state, including terminal ones.
    pub fn push_log(&mut self, entry: LogEntry) {
        self.updated_at = entry.timestamp.max(self.updated_at);
        self.logs.push(entry);
    }

    /// Raise progress; never lowers it.
    fn raise_progress(&mut self, value: u8) {
        self.progress = self.progress.max(value.min(100));
    }

    /// Apply a transition if the job is currently in `from` and the edge is legal.
    pub fn apply(&mut self, from: JobStatus, transition: Transition) -> Result<(), TransitionError> {
        if self.status != from {
            return Err(TransitionError::StateMismatch {
                expected: from,
                actual: self.status,
            });
        }
        let to = transition.target();
        if !from.can_transition_to(to) {
            return Err(TransitionError::Illegal { from, to });
        }

        let now = Utc::now();
        match transition {
            Transition::Admit { worker_id } => {
                self.started_at.get_or_insert(now);
                self.push_log(LogEntry::info(format!("Admitted to worker slot {}", worker_id)));
                self.worker_id = Some(worker_id);
            }
            Transition::StartRendering { render_id } => {
                if let Some(existing) = &self.render_id {
                    return Err(TransitionError::RenderIdAlreadySet(existing.clone()));
                }
                self.worker_id = None;
                self.current_step = Some("Rendering video".to_string());
                self.push_log(LogEntry::info(format!("Render started ({})", render_id)));
                self.render_id = Some(render_id);
            }
            Transition::Complete { video_url } => {
                self.completed_at.get_or_insert(now);
                self.raise_progress(100);
                self.current_step = Some("Complete".to_string());
                self.push_log(LogEntry::info(format!("Video ready: {}", video_url)));
                self.video_url = Some(video_url);
            }
            Transition::Fail { error } => {
                self.failed_at.get_or_insert(now);
                self.worker_id = None;
                self.push_log(LogEntry::error(error.clone()));
                self.error = Some(error);
            }
            Transition::Cancel { reason } => {
                self.cancelled_at.get_or_insert(now);
                self.worker_id = None;
                let message = match reason {
                    Some(reason) => format!("Cancelled: {}", reason),
                    None => "Cancelled".to_string(),
                };
                self.push_log(LogEntry::warn(message));
            }
        }

        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Apply an internal step event from the generation subprocess.
    ///
    /// Rejected unless the job is active and `event.sequence` is greater than
    /// the last applied one. Does not perform the `active -> rendering`
    /// transition; callers do that with [`Job::apply`] when the event carries
    /// a render id.
    pub fn apply_step_event(&mut self, event: &StepEvent) -> Result<(), TransitionError> {
        if self.status != JobStatus::Active {
            return Err(TransitionError::NotActive(self.status));
        }
        if let Some(last_applied) = self.last_sequence {
            if event.sequence <= last_applied {
                return Err(TransitionError::StaleSequence {
                    sequence: event.sequence,
                    last_applied,
                });
            }
        }

        self.last_sequence = Some(event.sequence);
        self.current_step = Some(event.step_name.clone());
        self.raise_progress(step_progress(event.step_number, event.status, self.total_steps));

        let mut message = format!(
            "Step {}/{} {}: {}",
            event.step_number,
            self.total_steps,
            event.status.as_str(),
            event.step_name
        );
        if let Some(details) = event.details_summary() {
            message.push_str(" - ");
            message.push_str(&details);
        }
        self.push_log(LogEntry {
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
            level: LogLevel::Info,
            message,
        });
        Ok(())
    }
}

/// Progress for an internal step: completed steps over total, capped below 100.
pub fn step_progress(step_number: u32, state: StepState, total_steps: u32) -> u8 {
    let total = total_steps.max(1) as u64;
    let done = match state {
        StepState::Completed => step_number as u64,
        StepState::Started => (step_number as u64).saturating_sub(1),
    };
    let pct = (done.min(total) * 100) / total;
    (pct as u8).min(PRE_RENDER_PROGRESS_CAP)
}
