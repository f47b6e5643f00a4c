//! Job scheduler.
//!
//! Wires admission, supervision, ingestion and render monitoring together.
//! Every job status change still goes through the [`JobStore`]; the
//! scheduler only decides *when* to request one and keeps the worker pool
//! and render monitor in step with the result.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use vgen_models::{Job, JobId, JobStatus, LogEntry, QueueStatus, Transition, TransitionError, WebhookPayload};
use vgen_notify::Notifier;
use vgen_queue::{Admission, AdmissionController, EventBroadcaster};
use vgen_store::{JobFilter, JobStore, StoreError};

use crate::config::SchedulerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::fanout::Fanout;
use crate::ingestion::{IngestOutcome, WebhookIngestion};
use crate::metrics;
use crate::monitor::RenderMonitor;
use crate::supervisor::{ExitOutcome, JobLauncher, ProcessExit};

/// Error recorded when a workflow exits cleanly without reaching rendering.
pub const WORKFLOW_INCOMPLETE_ERROR: &str =
    "workflow incomplete: process exited without reporting a render id";

/// Error recorded for jobs that were active when the scheduler stopped.
pub const RESTART_INTERRUPTED_ERROR: &str = "scheduler restarted while job was active";

/// What [`Scheduler::recover`] did with the jobs it found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub retracked: usize,
    pub failed: usize,
}

/// Front door for job lifecycle operations.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<JobStore>,
    admission: Mutex<AdmissionController>,
    launcher: Arc<dyn JobLauncher>,
    ingestion: Arc<WebhookIngestion>,
    monitor: Arc<RenderMonitor>,
    fanout: Arc<Fanout>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<JobStore>,
        fanout: Arc<Fanout>,
        launcher: Arc<dyn JobLauncher>,
        ingestion: Arc<WebhookIngestion>,
        monitor: Arc<RenderMonitor>,
    ) -> Self {
        let admission = Mutex::new(AdmissionController::new(config.max_concurrent_jobs));
        Self {
            config,
            store,
            admission,
            launcher,
            ingestion,
            monitor,
            fanout,
        }
    }

    fn admission(&self) -> MutexGuard<'_, AdmissionController> {
        self.admission.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        self.fanout.broadcaster()
    }

    pub fn notifier(&self) -> Option<&Notifier> {
        self.fanout.notifier()
    }

    pub fn monitor(&self) -> &Arc<RenderMonitor> {
        &self.monitor
    }

    // ========================================================================
    // Submission and admission
    // ========================================================================

    /// Create a job and admit it, or queue it when every worker is busy.
    pub async fn submit(&self, parameters: serde_json::Value) -> WorkerResult<Job> {
        if !parameters.is_object() {
            return Err(WorkerError::invalid_input("parameters must be a JSON object"));
        }
        let job = self.store.create(parameters, self.config.total_steps).await?;
        metrics::record_submitted();
        info!(job_id = %job.id, "Job submitted");
        self.fanout.job_updated(&job);
        self.enqueue(job).await
    }

    async fn enqueue(&self, job: Job) -> WorkerResult<Job> {
        let admission = self.admission().try_admit(&job.id);
        match admission {
            Admission::Admitted { worker_id } => {
                self.run_admissions(Some((job.id.clone(), worker_id))).await;
            }
            Admission::Queued { position } => {
                let queued = self
                    .store
                    .append_log(&job.id, LogEntry::info(format!("Queued at position {}", position)))
                    .await?;
                debug!(job_id = %job.id, position, "Job queued");
                self.fanout.log_appended(&queued);
            }
        }
        self.refresh_gauges();
        Ok(self.store.get(&job.id).await?)
    }

    /// Start admitted jobs until one launches or the queue runs dry.
    async fn run_admissions(&self, mut next: Option<(JobId, String)>) {
        while let Some((job_id, worker_id)) = next.take() {
            next = self.start(&job_id, &worker_id).await;
        }
    }

    /// Move an admitted job to `active` and launch its workflow.
    ///
    /// When the job cannot start its slot is released, and the job that
    /// inherits it is returned for the caller to start.
    async fn start(&self, job_id: &JobId, worker_id: &str) -> Option<(JobId, String)> {
        let job = match self
            .store
            .transition(
                job_id,
                JobStatus::Pending,
                Transition::Admit {
                    worker_id: worker_id.to_string(),
                },
            )
            .await
        {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Admitted job could not start");
                return self.admission().release(job_id);
            }
        };
        info!(job_id = %job.id, worker_id = %worker_id, "Job admitted");
        self.fanout.job_transitioned(&job);

        if let Err(e) = self.launcher.launch(&job, worker_id).await {
            error!(job_id = %job.id, error = %e, "Workflow launch failed");
            let message = match e {
                WorkerError::SpawnFailed(msg) => format!("failed to start workflow: {}", msg),
                other => format!("failed to start workflow: {}", other),
            };
            self.fail_active(&job.id, message).await;
            return self.admission().release(job_id);
        }

        // A cancel that landed while launch was in flight found nothing to stop
        if let Ok(current) = self.store.get(job_id).await {
            if current.status == JobStatus::Cancelled {
                let terminated = self.launcher.terminate(job_id).await;
                info!(job_id = %job_id, terminated, "Stopped workflow of job cancelled during launch");
            }
        }
        None
    }

    /// Free a job's worker slot and start whoever inherits it.
    async fn release_slot(&self, job_id: &JobId) {
        let next = self.admission().release(job_id);
        self.run_admissions(next).await;
        self.refresh_gauges();
    }

    async fn fail_active(&self, job_id: &JobId, error: String) {
        match self
            .store
            .transition(job_id, JobStatus::Active, Transition::Fail { error })
            .await
        {
            Ok(job) => self.fanout.job_transitioned(&job),
            Err(e) => debug!(job_id = %job_id, error = %e, "Failure not recorded"),
        }
    }

    // ========================================================================
    // Cancellation, retry, deletion
    // ========================================================================

    /// Cancel a pending or active job.
    pub async fn cancel(&self, job_id: &JobId) -> WorkerResult<Job> {
        let job = self.store.get(job_id).await?;
        match job.status {
            JobStatus::Pending => {
                self.admission().remove_queued(job_id);
                match self
                    .store
                    .transition(job_id, JobStatus::Pending, Transition::Cancel { reason: None })
                    .await
                {
                    Ok(job) => {
                        info!(job_id = %job_id, "Pending job cancelled");
                        self.fanout.job_transitioned(&job);
                        // admitted but not yet started
                        self.release_slot(job_id).await;
                        Ok(job)
                    }
                    Err(StoreError::Rejected(TransitionError::StateMismatch {
                        actual: JobStatus::Active,
                        ..
                    })) => self.cancel_active(job_id).await,
                    Err(e) => Err(e.into()),
                }
            }
            JobStatus::Active => self.cancel_active(job_id).await,
            status => Err(WorkerError::conflict(format!(
                "job {} is {}; only pending or active jobs can be cancelled",
                job_id, status
            ))),
        }
    }

    async fn cancel_active(&self, job_id: &JobId) -> WorkerResult<Job> {
        let job = self
            .store
            .transition(job_id, JobStatus::Active, Transition::Cancel { reason: None })
            .await?;
        self.fanout.job_transitioned(&job);

        let terminated = self.launcher.terminate(job_id).await;
        info!(job_id = %job_id, terminated, "Active job cancelled");
        self.release_slot(job_id).await;
        Ok(job)
    }

    /// Submit a failed or cancelled job's parameters again as a new job.
    pub async fn retry(&self, job_id: &JobId) -> WorkerResult<Job> {
        let original = self.store.get(job_id).await?;
        if !matches!(original.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(WorkerError::conflict(format!(
                "job {} is {}; only failed or cancelled jobs can be retried",
                job_id, original.status
            )));
        }
        if original.retry_count >= self.config.max_retries {
            return Err(WorkerError::conflict(format!(
                "job {} reached the retry limit ({})",
                job_id, self.config.max_retries
            )));
        }

        let mut job = Job::new(original.parameters.clone(), self.config.total_steps)
            .with_retry_count(original.retry_count + 1);
        job.push_log(LogEntry::info(format!("Retry of job {}", job_id)));
        let job = self.store.insert(job).await?;
        metrics::record_submitted();
        info!(job_id = %job.id, retry_of = %job_id, retry_count = job.retry_count, "Job retried");
        self.fanout.job_updated(&job);
        self.enqueue(job).await
    }

    /// Delete a terminal job.
    pub async fn delete(&self, job_id: &JobId) -> WorkerResult<Job> {
        let job = self.store.delete(job_id).await?;
        self.monitor.untrack(job_id);
        Ok(job)
    }

    pub async fn get(&self, job_id: &JobId) -> WorkerResult<Job> {
        Ok(self.store.get(job_id).await?)
    }

    pub async fn list(&self, filter: &JobFilter) -> WorkerResult<Vec<Job>> {
        Ok(self.store.list(filter).await?)
    }

    // ========================================================================
    // Webhooks and workflow exits
    // ========================================================================

    /// Apply a webhook payload and react to the resulting state change.
    pub async fn ingest(&self, payload: &WebhookPayload) -> WorkerResult<IngestOutcome> {
        let outcome = self.ingestion.ingest(payload).await?;
        match &outcome {
            IngestOutcome::EnteredRendering(job) => {
                self.release_slot(&job.id).await;
                if let Some(render_id) = &job.render_id {
                    self.monitor.track(&job.id, render_id);
                }
            }
            IngestOutcome::Finalized(job) => {
                self.monitor.untrack(&job.id);
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// React to a workflow subprocess ending.
    pub async fn handle_exit(&self, exit: ProcessExit) {
        let ProcessExit { job_id, outcome } = exit;
        match self.store.get(&job_id).await {
            Ok(job) => match (job.status, &outcome) {
                (JobStatus::Active, ExitOutcome::Success) => {
                    warn!(job_id = %job_id, "Workflow exited without reporting a render id");
                    self.fail_active(&job_id, WORKFLOW_INCOMPLETE_ERROR.to_string())
                        .await;
                }
                (JobStatus::Active, outcome) => {
                    if let Some(message) = outcome.error_message() {
                        self.fail_active(&job_id, message).await;
                    }
                }
                (JobStatus::Rendering, outcome) => {
                    if let Some(message) = outcome.error_message() {
                        let noted = self
                            .store
                            .append_log(
                                &job_id,
                                LogEntry::warn(format!("Workflow exited after render started: {}", message)),
                            )
                            .await;
                        if let Ok(job) = noted {
                            self.fanout.log_appended(&job);
                        }
                    }
                }
                (status, outcome) => {
                    debug!(job_id = %job_id, %status, outcome = outcome.label(), "Workflow exit ignored");
                }
            },
            Err(e) => debug!(job_id = %job_id, error = %e, "Exit for unknown job"),
        }
        self.release_slot(&job_id).await;
    }

    /// Consume workflow exits until the channel closes.
    pub async fn run_exit_loop(self: Arc<Self>, mut exits: mpsc::UnboundedReceiver<ProcessExit>) {
        while let Some(exit) = exits.recv().await {
            self.handle_exit(exit).await;
        }
        debug!("Workflow exit channel closed");
    }

    // ========================================================================
    // Reporting and recovery
    // ========================================================================

    fn refresh_gauges(&self) {
        let snapshot = self.admission().snapshot();
        metrics::set_admission(snapshot.active_workers, snapshot.queue_length);
    }

    /// Counts by status plus worker pool and render monitor occupancy.
    pub async fn queue_status(&self) -> WorkerResult<QueueStatus> {
        let counts = self.store.counts().await?;
        let admission = self.admission().snapshot();
        let render = self.monitor.stats();
        metrics::set_admission(admission.active_workers, admission.queue_length);
        metrics::set_render_monitor(render.tracked, render.queued);

        Ok(QueueStatus {
            counts,
            queue_length: admission.queue_length,
            active_workers: admission.active_workers,
            available_workers: admission.available_workers,
            max_workers: admission.max_workers,
            render_tracked: render.tracked,
            render_queued: render.queued,
            render_capacity: render.capacity,
            timestamp: Utc::now(),
        })
    }

    /// Pick up live jobs left by a previous run.
    ///
    /// Pending jobs are queued again oldest first, rendering jobs go back to
    /// the render monitor, and active jobs are failed since their workflow
    /// process is gone.
    pub async fn recover(&self) -> WorkerResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for job in self.store.jobs_in(JobStatus::Active).await? {
            self.fail_active(&job.id, RESTART_INTERRUPTED_ERROR.to_string())
                .await;
            report.failed += 1;
        }

        for job in self.store.jobs_in(JobStatus::Rendering).await? {
            match &job.render_id {
                Some(render_id) => {
                    self.monitor.track(&job.id, render_id);
                    report.retracked += 1;
                }
                None => {
                    let failed = self
                        .ingestion
                        .fail_rendering(&job.id, RESTART_INTERRUPTED_ERROR)
                        .await;
                    if let Err(e) = failed {
                        warn!(job_id = %job.id, error = %e, "Could not fail orphaned render");
                    }
                    report.failed += 1;
                }
            }
        }

        for job in self.store.jobs_in(JobStatus::Pending).await? {
            let admission = self.admission().try_admit(&job.id);
            if let Admission::Admitted { worker_id } = admission {
                self.run_admissions(Some((job.id, worker_id))).await;
            }
            report.requeued += 1;
        }

        self.refresh_gauges();
        info!(
            requeued = report.requeued,
            retracked = report.retracked,
            failed = report.failed,
            "Recovery complete"
        );
        Ok(report)
    }
}
