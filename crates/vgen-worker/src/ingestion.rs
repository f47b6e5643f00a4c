//! Webhook ingestion.
//!
//! The single path through which the generation subprocess (step events)
//! and the render service (render events) change job state. Every event is
//! validated against the job's current state by the store's critical
//! section; rejected events leave the job untouched and are only logged.
//!
//! Ingestion does not own worker slots or the render monitor. It reports
//! what happened as an [`IngestOutcome`] and the scheduler reacts to it.

use std::sync::Arc;

use tracing::{debug, info, warn};
use vgen_models::{
    Job, JobId, JobStatus, LogEntry, RenderEvent, RenderStatus, StepEvent, Transition,
    TransitionError, WebhookPayload,
};
use vgen_store::{JobStore, StoreError};

use crate::error::{WorkerError, WorkerResult};
use crate::fanout::Fanout;
use crate::metrics;

/// Error recorded when a render reports success without an artifact.
pub const MISSING_VIDEO_URL_ERROR: &str = "render completed without a video url";

/// Result of applying one webhook event.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Step progress applied; job still active
    Applied(Job),
    /// Final step reported a render id; job moved `active -> rendering`
    EnteredRendering(Job),
    /// Render reached a terminal state; job is completed or failed
    Finalized(Job),
    /// Non-terminal render status, recorded as a log line
    Noted(Job),
    /// Event did not match the job's state; nothing changed
    Rejected { job_id: JobId, reason: TransitionError },
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, IngestOutcome::Rejected { .. })
    }

    pub fn job(&self) -> Option<&Job> {
        match self {
            IngestOutcome::Applied(job)
            | IngestOutcome::EnteredRendering(job)
            | IngestOutcome::Finalized(job)
            | IngestOutcome::Noted(job) => Some(job),
            IngestOutcome::Rejected { .. } => None,
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            IngestOutcome::Rejected { job_id, .. } => job_id,
            IngestOutcome::Applied(job)
            | IngestOutcome::EnteredRendering(job)
            | IngestOutcome::Finalized(job)
            | IngestOutcome::Noted(job) => &job.id,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Applied(_) => "applied",
            IngestOutcome::EnteredRendering(_) => "entered_rendering",
            IngestOutcome::Finalized(_) => "finalized",
            IngestOutcome::Noted(_) => "noted",
            IngestOutcome::Rejected { reason, .. } => reason.code(),
        }
    }
}

/// Applies inbound events to the job store and fans out the results.
pub struct WebhookIngestion {
    store: Arc<JobStore>,
    fanout: Arc<Fanout>,
}

impl WebhookIngestion {
    pub fn new(store: Arc<JobStore>, fanout: Arc<Fanout>) -> Self {
        Self { store, fanout }
    }

    /// Apply either payload shape.
    pub async fn ingest(&self, payload: &WebhookPayload) -> WorkerResult<IngestOutcome> {
        let outcome = match payload {
            WebhookPayload::Step(event) => self.apply_step_event(event).await,
            WebhookPayload::Render(event) => self.apply_render_event(event).await,
        };
        match &outcome {
            Ok(o) => metrics::record_webhook(payload.kind(), o.label()),
            Err(WorkerError::NotFound(_)) => metrics::record_webhook(payload.kind(), "unknown"),
            Err(_) => metrics::record_webhook(payload.kind(), "error"),
        }
        outcome
    }

    /// Apply a step event from the generation subprocess.
    pub async fn apply_step_event(&self, event: &StepEvent) -> WorkerResult<IngestOutcome> {
        let job = match self.store.apply_step_event(event).await {
            Ok(job) => job,
            Err(StoreError::Rejected(reason)) => {
                warn!(
                    job_id = %event.job_id,
                    sequence = event.sequence,
                    step = event.step_number,
                    reason = %reason,
                    "Step event rejected"
                );
                return Ok(IngestOutcome::Rejected {
                    job_id: event.job_id.clone(),
                    reason,
                });
            }
            Err(e) => return Err(e.into()),
        };

        debug!(
            job_id = %job.id,
            sequence = event.sequence,
            step = event.step_number,
            progress = job.progress,
            "Step event applied"
        );
        self.fanout.job_updated(&job);

        let Some(render_id) = event.reported_render_id() else {
            return Ok(IngestOutcome::Applied(job));
        };

        match self
            .store
            .transition(
                &job.id,
                JobStatus::Active,
                Transition::StartRendering {
                    render_id: render_id.to_string(),
                },
            )
            .await
        {
            Ok(job) => {
                info!(job_id = %job.id, render_id = %render_id, "Job entered rendering");
                self.fanout.job_transitioned(&job);
                Ok(IngestOutcome::EnteredRendering(job))
            }
            Err(StoreError::Rejected(reason)) => {
                warn!(job_id = %job.id, render_id = %render_id, reason = %reason, "Render id not recorded");
                Ok(IngestOutcome::Applied(job))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a render status pushed by (or polled from) the render service.
    pub async fn apply_render_event(&self, event: &RenderEvent) -> WorkerResult<IngestOutcome> {
        let job = self
            .store
            .find_by_render_id(&event.render_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => {
                    WorkerError::not_found(format!("no job for render {}", event.render_id))
                }
                other => other.into(),
            })?;

        let transition = match event.status {
            RenderStatus::Completed => match event.url.as_deref().filter(|u| !u.trim().is_empty()) {
                Some(url) => Transition::Complete {
                    video_url: url.to_string(),
                },
                None => Transition::Fail {
                    error: MISSING_VIDEO_URL_ERROR.to_string(),
                },
            },
            RenderStatus::Failed => Transition::Fail {
                error: event
                    .error
                    .clone()
                    .filter(|e| !e.trim().is_empty())
                    .map(|e| format!("render failed: {}", e))
                    .unwrap_or_else(|| "render failed".to_string()),
            },
            RenderStatus::Queued | RenderStatus::Rendering => {
                return self.note_render_status(job, event).await;
            }
        };

        self.finish_rendering(&job.id, transition).await
    }

    /// Fail a rendering job (render monitor gave up, or similar).
    pub async fn fail_rendering(&self, job_id: &JobId, error: impl Into<String>) -> WorkerResult<IngestOutcome> {
        self.finish_rendering(job_id, Transition::Fail { error: error.into() })
            .await
    }

    async fn finish_rendering(&self, job_id: &JobId, transition: Transition) -> WorkerResult<IngestOutcome> {
        match self
            .store
            .transition(job_id, JobStatus::Rendering, transition)
            .await
        {
            Ok(job) => {
                match job.status {
                    JobStatus::Completed => info!(
                        job_id = %job.id,
                        video_url = job.video_url.as_deref().unwrap_or_default(),
                        "Job completed"
                    ),
                    _ => warn!(
                        job_id = %job.id,
                        error = job.error.as_deref().unwrap_or_default(),
                        "Render failed"
                    ),
                }
                self.fanout.job_transitioned(&job);
                Ok(IngestOutcome::Finalized(job))
            }
            Err(StoreError::Rejected(reason)) => {
                debug!(job_id = %job_id, reason = %reason, "Render event ignored");
                Ok(IngestOutcome::Rejected {
                    job_id: job_id.clone(),
                    reason,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn note_render_status(&self, job: Job, event: &RenderEvent) -> WorkerResult<IngestOutcome> {
        if job.status != JobStatus::Rendering {
            return Ok(IngestOutcome::Rejected {
                job_id: job.id,
                reason: TransitionError::StateMismatch {
                    expected: JobStatus::Rendering,
                    actual: job.status,
                },
            });
        }
        let job = self
            .store
            .append_log(&job.id, LogEntry::info(format!("Render status: {}", event.status.as_str())))
            .await?;
        self.fanout.log_appended(&job);
        Ok(IngestOutcome::Noted(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vgen_models::StepState;
    use vgen_queue::EventBroadcaster;
    use vgen_store::{MemoryRepository, StoreConfig};

    async fn setup() -> (Arc<JobStore>, WebhookIngestion, Arc<EventBroadcaster>) {
        let store = Arc::new(
            JobStore::open(Arc::new(MemoryRepository::new()), StoreConfig::default())
                .await
                .unwrap(),
        );
        let broadcaster = Arc::new(EventBroadcaster::default());
        let fanout = Arc::new(Fanout::new(broadcaster.clone(), None));
        (store.clone(), WebhookIngestion::new(store, fanout), broadcaster)
    }

    async fn active_job(store: &JobStore) -> Job {
        let job = store.create(json!({}), 4).await.unwrap();
        store
            .transition(&job.id, JobStatus::Pending, Transition::Admit { worker_id: "worker-0".into() })
            .await
            .unwrap()
    }

    fn step(job_id: &JobId, sequence: u64, step_number: u32, render_id: Option<&str>) -> StepEvent {
        StepEvent {
            job_id: job_id.clone(),
            sequence,
            step_number,
            step_name: format!("step {}", step_number),
            status: StepState::Completed,
            timestamp: None,
            details: None,
            render_id: render_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_step_event_updates_and_broadcasts() {
        let (store, ingestion, bus) = setup().await;
        let job = active_job(&store).await;
        let mut rx = bus.subscribe_job(&job.id);

        let outcome = ingestion.apply_step_event(&step(&job.id, 1, 2, None)).await.unwrap();
        let IngestOutcome::Applied(updated) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(updated.progress, 50);
        assert!(matches!(rx.recv().await.unwrap(), vgen_models::StreamEvent::Log { .. }));
        assert!(matches!(rx.recv().await.unwrap(), vgen_models::StreamEvent::JobUpdated { .. }));
    }

    #[tokio::test]
    async fn test_out_of_order_step_is_rejected() {
        let (store, ingestion, _) = setup().await;
        let job = active_job(&store).await;

        ingestion.apply_step_event(&step(&job.id, 5, 2, None)).await.unwrap();
        let before = store.get(&job.id).await.unwrap();
        let outcome = ingestion.apply_step_event(&step(&job.id, 3, 3, None)).await.unwrap();

        assert!(!outcome.is_accepted());
        assert_eq!(store.get(&job.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_final_step_enters_rendering() {
        let (store, ingestion, _) = setup().await;
        let job = active_job(&store).await;

        let outcome = ingestion
            .apply_step_event(&step(&job.id, 1, 4, Some("r-1")))
            .await
            .unwrap();
        let IngestOutcome::EnteredRendering(job) = outcome else {
            panic!("expected rendering");
        };
        assert_eq!(job.status, JobStatus::Rendering);
        assert_eq!(job.render_id.as_deref(), Some("r-1"));
        assert!(job.progress < 100);
    }

    #[tokio::test]
    async fn test_render_completion_and_duplicate() {
        let (store, ingestion, _) = setup().await;
        let job = active_job(&store).await;
        ingestion
            .apply_step_event(&step(&job.id, 1, 4, Some("r-2")))
            .await
            .unwrap();

        let event = RenderEvent::completed("r-2", "https://cdn.example/x.mp4");
        let first = ingestion.apply_render_event(&event).await.unwrap();
        assert!(matches!(first, IngestOutcome::Finalized(ref j) if j.progress == 100));
        let done = store.get(&job.id).await.unwrap();

        let second = ingestion.apply_render_event(&event).await.unwrap();
        assert!(!second.is_accepted());
        assert_eq!(store.get(&job.id).await.unwrap(), done);
    }

    #[tokio::test]
    async fn test_completed_without_url_fails() {
        let (store, ingestion, _) = setup().await;
        let job = active_job(&store).await;
        ingestion
            .apply_step_event(&step(&job.id, 1, 4, Some("r-3")))
            .await
            .unwrap();

        let event = RenderEvent {
            render_id: "r-3".into(),
            status: RenderStatus::Completed,
            url: None,
            error: None,
        };
        ingestion.apply_render_event(&event).await.unwrap();
        let job = store.get(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(MISSING_VIDEO_URL_ERROR));
    }

    #[tokio::test]
    async fn test_unknown_render_id_is_not_found() {
        let (_, ingestion, _) = setup().await;
        let err = ingestion
            .apply_render_event(&RenderEvent::failed("r-404", "boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_non_terminal_render_push_is_log_only() {
        let (store, ingestion, _) = setup().await;
        let job = active_job(&store).await;
        ingestion
            .apply_step_event(&step(&job.id, 1, 4, Some("r-5")))
            .await
            .unwrap();

        let event = RenderEvent {
            render_id: "r-5".into(),
            status: RenderStatus::Rendering,
            url: None,
            error: None,
        };
        let outcome = ingestion.apply_render_event(&event).await.unwrap();
        let IngestOutcome::Noted(job) = outcome else {
            panic!("expected noted");
        };
        assert_eq!(job.status, JobStatus::Rendering);
        assert_eq!(job.logs.last().unwrap().message, "Render status: rendering");
    }
}
