//! Shared data models for the vgen scheduler.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their lifecycle status and the pure transition function
//! - Webhook payloads (subprocess step events, render results)
//! - Stream patches pushed to live subscribers
//! - Queue status reporting

pub mod event;
pub mod job;
pub mod job_status;
pub mod queue_status;
pub mod stream;

// Re-export common types
pub use event::{RenderEvent, RenderStatus, StepEvent, StepState, WebhookPayload};
pub use job::{step_progress, Job, JobId, LogEntry, LogLevel, Transition, TransitionError, PRE_RENDER_PROGRESS_CAP};
pub use job_status::JobStatus;
pub use queue_status::QueueStatus;
pub use stream::StreamEvent;
