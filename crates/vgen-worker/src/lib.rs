//! Video generation job scheduler.
//!
//! This crate provides:
//! - The scheduler: submission, admission, cancellation, retry and recovery
//! - Workflow supervision of one generation subprocess per active job
//! - Webhook ingestion for step events and render results
//! - The render monitor, polling the render service with backoff
//! - Fan-out of job changes to stream and webhook subscribers

pub mod clock;
pub mod config;
pub mod error;
pub mod fanout;
pub mod ingestion;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod scheduler;
pub mod supervisor;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MonitorConfig, SchedulerConfig, SupervisorConfig};
pub use error::{WorkerError, WorkerResult};
pub use fanout::Fanout;
pub use ingestion::{IngestOutcome, WebhookIngestion, MISSING_VIDEO_URL_ERROR};
pub use logging::JobLogger;
pub use monitor::{MonitorStats, RenderMonitor, TrackOutcome};
pub use scheduler::{RecoveryReport, Scheduler, RESTART_INTERRUPTED_ERROR, WORKFLOW_INCOMPLETE_ERROR};
pub use supervisor::{ExitOutcome, JobLauncher, ProcessExit, WorkflowSupervisor};
