//! Render monitor.
//!
//! Polls the render service for jobs in `rendering`, as a backstop for
//! missed or delayed render pushes. At most `capacity` jobs are tracked at
//! once; the rest wait in FIFO order. Due checks come off a min-heap keyed
//! by `next_check_at` that a single loop drains, so there is one timer for
//! the whole monitor and tests can drive it with a [`ManualClock`].
//!
//! [`ManualClock`]: crate::clock::ManualClock

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};
use vgen_models::{JobId, JobStatus, RenderStatus};
use vgen_render_client::RenderStatusSource;

use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::ingestion::{IngestOutcome, WebhookIngestion};
use crate::logging::JobLogger;
use crate::metrics;

/// Polling state for one tracked render. Never leaves this module.
#[derive(Debug, Clone)]
struct RenderRecord {
    render_id: String,
    attempt_count: u32,
    last_status: Option<RenderStatus>,
    interval: Duration,
    next_check_at: Instant,
}

#[derive(Default)]
struct MonitorState {
    tracked: HashMap<JobId, RenderRecord>,
    waiting: VecDeque<(JobId, String)>,
    schedule: BinaryHeap<Reverse<(Instant, JobId)>>,
}

/// Result of [`RenderMonitor::track`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Tracking,
    /// Monitor full; 1-based position in the waiting list
    Queued { position: usize },
    AlreadyTracked,
}

/// Counters for queue status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStats {
    pub tracked: usize,
    pub queued: usize,
    pub capacity: usize,
}

/// Bounded pool of render pollers.
pub struct RenderMonitor {
    config: MonitorConfig,
    source: Arc<dyn RenderStatusSource>,
    ingestion: Arc<WebhookIngestion>,
    clock: Arc<dyn Clock>,
    state: Mutex<MonitorState>,
    wake: Notify,
}

impl RenderMonitor {
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn RenderStatusSource>,
        ingestion: Arc<WebhookIngestion>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: MonitorConfig {
                capacity: config.capacity.max(1),
                ..config
            },
            source,
            ingestion,
            clock,
            state: Mutex::new(MonitorState::default()),
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_tracking(&self, state: &mut MonitorState, job_id: JobId, render_id: String) {
        let next_check_at = self.clock.now() + self.config.initial_interval;
        state.schedule.push(Reverse((next_check_at, job_id.clone())));
        state.tracked.insert(
            job_id,
            RenderRecord {
                render_id,
                attempt_count: 0,
                last_status: None,
                interval: self.config.initial_interval,
                next_check_at,
            },
        );
    }

    fn publish_gauges(state: &MonitorState) {
        metrics::set_render_monitor(state.tracked.len(), state.waiting.len());
    }

    /// Start polling a job's render, or queue it if the monitor is full.
    pub fn track(&self, job_id: &JobId, render_id: &str) -> TrackOutcome {
        let mut state = self.lock();
        if state.tracked.contains_key(job_id) || state.waiting.iter().any(|(id, _)| id == job_id) {
            return TrackOutcome::AlreadyTracked;
        }

        let outcome = if state.tracked.len() < self.config.capacity {
            self.start_tracking(&mut state, job_id.clone(), render_id.to_string());
            debug!(job_id = %job_id, render_id = %render_id, "Render tracking started");
            TrackOutcome::Tracking
        } else {
            state.waiting.push_back((job_id.clone(), render_id.to_string()));
            debug!(job_id = %job_id, position = state.waiting.len(), "Render monitor full, job queued");
            TrackOutcome::Queued {
                position: state.waiting.len(),
            }
        };
        Self::publish_gauges(&state);
        drop(state);

        self.wake.notify_one();
        outcome
    }

    /// Stop tracking a job and hand its slot to the next waiting job.
    /// Returns false if the job was neither tracked nor waiting.
    pub fn untrack(&self, job_id: &JobId) -> bool {
        let mut state = self.lock();
        let removed = if state.tracked.remove(job_id).is_some() {
            if let Some((next_id, render_id)) = state.waiting.pop_front() {
                debug!(job_id = %next_id, "Render tracking started from queue");
                self.start_tracking(&mut state, next_id, render_id);
            }
            true
        } else if let Some(pos) = state.waiting.iter().position(|(id, _)| id == job_id) {
            state.waiting.remove(pos);
            true
        } else {
            false
        };
        Self::publish_gauges(&state);
        drop(state);

        if removed {
            self.wake.notify_one();
        }
        removed
    }

    pub fn stats(&self) -> MonitorStats {
        let state = self.lock();
        MonitorStats {
            tracked: state.tracked.len(),
            queued: state.waiting.len(),
            capacity: self.config.capacity,
        }
    }

    pub fn is_tracking(&self, job_id: &JobId) -> bool {
        self.lock().tracked.contains_key(job_id)
    }

    /// Checks made so far for a tracked job.
    pub fn attempts(&self, job_id: &JobId) -> Option<u32> {
        self.lock().tracked.get(job_id).map(|r| r.attempt_count)
    }

    /// When the next check is due, if anything is tracked.
    pub fn next_due(&self) -> Option<Instant> {
        let mut state = self.lock();
        loop {
            let Reverse((at, job_id)) = state.schedule.peek()?.clone();
            match state.tracked.get(&job_id) {
                Some(record) if record.next_check_at == at => return Some(at),
                _ => {
                    state.schedule.pop();
                }
            }
        }
    }

    /// Pop every due entry, dropping stale heap entries.
    fn take_due(&self, now: Instant) -> Vec<(JobId, String)> {
        let mut state = self.lock();
        let mut due = Vec::new();
        while let Some(Reverse((at, _))) = state.schedule.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((at, job_id))) = state.schedule.pop() else {
                break;
            };
            if let Some(record) = state.tracked.get(&job_id) {
                if record.next_check_at == at {
                    due.push((job_id, record.render_id.clone()));
                }
            }
        }
        due
    }

    /// Check every job whose `next_check_at` has passed. Returns the number
    /// of checks made.
    pub async fn poll_due(&self) -> usize {
        let due = self.take_due(self.clock.now());
        if due.is_empty() {
            return 0;
        }
        let count = due.len();
        join_all(due.into_iter().map(|(job_id, render_id)| self.check(job_id, render_id))).await;
        count
    }

    async fn check(&self, job_id: JobId, render_id: String) {
        let logger = JobLogger::new(&job_id, "render_monitor");
        let result = self.source.fetch_status(&render_id).await;

        let status = match result {
            Ok(event) if event.status.is_terminal() => {
                metrics::record_render_poll("terminal");
                match self.ingestion.apply_render_event(&event).await {
                    Ok(IngestOutcome::Finalized(job)) => {
                        let message = format!("render {} reached {} via poll", render_id, job.status);
                        if job.status == JobStatus::Failed {
                            logger.log_warning(&message);
                        } else {
                            logger.log_completion(&message);
                        }
                        self.untrack(&job_id);
                        return;
                    }
                    Ok(other) => {
                        debug!(job_id = %job_id, outcome = ?other, "Polled render result not applied");
                        self.untrack(&job_id);
                        return;
                    }
                    // Still rendering in the store; keep checking within the attempt budget
                    Err(e) => {
                        logger.log_warning(&format!("failed to apply polled render result: {}", e));
                        None
                    }
                }
            }
            Ok(event) => {
                metrics::record_render_poll("pending");
                Some(event.status)
            }
            Err(e) => {
                metrics::record_render_poll("error");
                warn!(job_id = %job_id, render_id = %render_id, error = %e, "Render status check failed");
                None
            }
        };

        let exhausted = {
            let mut state = self.lock();
            let now = self.clock.now();
            let Some(record) = state.tracked.get_mut(&job_id) else {
                return;
            };

            record.attempt_count += 1;
            let changed = status.is_some() && status != record.last_status;
            if changed || record.attempt_count % self.config.log_every.max(1) == 0 {
                info!(
                    job_id = %job_id,
                    render_id = %render_id,
                    attempt = record.attempt_count,
                    max_attempts = self.config.max_attempts,
                    status = status.map(|s| s.as_str()).unwrap_or("unknown"),
                    "Render still in progress"
                );
            }
            if status.is_some() {
                record.last_status = status;
            }

            if record.attempt_count >= self.config.max_attempts {
                Some(record.attempt_count)
            } else {
                record.interval = self.config.next_interval(record.interval);
                record.next_check_at = now + record.interval;
                let entry = Reverse((record.next_check_at, job_id.clone()));
                state.schedule.push(entry);
                None
            }
        };

        if let Some(attempts) = exhausted {
            let error = format!("render timeout after {} checks, verify manually", attempts);
            logger.log_error(&error);
            match self.ingestion.fail_rendering(&job_id, error).await {
                Ok(_) => {
                    self.untrack(&job_id);
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Failed to mark render timeout, retrying on next check");
                    self.reschedule(&job_id);
                }
            }
        }
    }

    /// Queue another check after the record's current interval.
    fn reschedule(&self, job_id: &JobId) {
        let mut state = self.lock();
        let now = self.clock.now();
        let Some(record) = state.tracked.get_mut(job_id) else {
            return;
        };
        record.next_check_at = now + record.interval;
        let entry = Reverse((record.next_check_at, job_id.clone()));
        state.schedule.push(entry);
    }

    /// Drive polling until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(capacity = self.config.capacity, "Render monitor started");
        loop {
            let sleep_for = self
                .next_due()
                .map(|at| at.saturating_duration_since(self.clock.now()));

            tokio::select! {
                _ = async {
                    match sleep_for {
                        Some(d) => tokio::time::sleep(d).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.poll_due().await;
                }
                _ = self.wake.notified() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Render monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fanout::Fanout;
    use async_trait::async_trait;
    use serde_json::json;
    use vgen_models::{Job, JobStatus, RenderEvent, Transition};
    use vgen_queue::EventBroadcaster;
    use vgen_render_client::RenderResult;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vgen_store::{JobRepository, JobStore, MemoryRepository, StoreConfig, StoreError, StoreResult};

    /// Render source that answers from a per-render script.
    #[derive(Default)]
    struct ScriptedSource {
        statuses: Mutex<HashMap<String, RenderStatus>>,
        calls: Mutex<u32>,
    }

    impl ScriptedSource {
        fn set(&self, render_id: &str, status: RenderStatus) {
            self.statuses.lock().unwrap().insert(render_id.to_string(), status);
        }
    }

    #[async_trait]
    impl RenderStatusSource for ScriptedSource {
        async fn fetch_status(&self, render_id: &str) -> RenderResult<RenderEvent> {
            *self.calls.lock().unwrap() += 1;
            let status = self
                .statuses
                .lock()
                .unwrap()
                .get(render_id)
                .copied()
                .unwrap_or(RenderStatus::Rendering);
            Ok(RenderEvent {
                render_id: render_id.to_string(),
                status,
                url: (status == RenderStatus::Completed).then(|| format!("https://cdn.example/{}.mp4", render_id)),
                error: None,
            })
        }
    }

    /// Memory repository whose next `fail_saves` writes fail.
    #[derive(Default)]
    struct FlakyRepository {
        inner: MemoryRepository,
        fail_saves: AtomicU32,
    }

    #[async_trait]
    impl JobRepository for FlakyRepository {
        async fn insert(&self, job: &Job) -> StoreResult<()> {
            self.inner.insert(job).await
        }

        async fn load(&self, id: &JobId) -> StoreResult<Option<Job>> {
            self.inner.load(id).await
        }

        async fn save(&self, job: &Job) -> StoreResult<()> {
            let failing = self
                .fail_saves
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
            }
            self.inner.save(job).await
        }

        async fn delete(&self, id: &JobId) -> StoreResult<bool> {
            self.inner.delete(id).await
        }

        async fn load_all(&self) -> StoreResult<Vec<Job>> {
            self.inner.load_all().await
        }
    }

    struct Harness {
        store: Arc<JobStore>,
        source: Arc<ScriptedSource>,
        clock: Arc<ManualClock>,
        monitor: RenderMonitor,
    }

    async fn harness(capacity: usize) -> Harness {
        harness_with_repo(capacity, Arc::new(MemoryRepository::new())).await
    }

    async fn harness_with_repo(capacity: usize, repo: Arc<dyn JobRepository>) -> Harness {
        let store = Arc::new(JobStore::open(repo, StoreConfig::default()).await.unwrap());
        let fanout = Arc::new(Fanout::new(Arc::new(EventBroadcaster::default()), None));
        let ingestion = Arc::new(WebhookIngestion::new(store.clone(), fanout));
        let source = Arc::new(ScriptedSource::default());
        let clock = Arc::new(ManualClock::new());
        let monitor = RenderMonitor::new(
            MonitorConfig {
                capacity,
                ..MonitorConfig::default()
            },
            source.clone(),
            ingestion,
            clock.clone(),
        );
        Harness {
            store,
            source,
            clock,
            monitor,
        }
    }

    async fn rendering_job(store: &JobStore, render_id: &str) -> Job {
        let job = store.create(json!({}), 3).await.unwrap();
        store
            .transition(&job.id, JobStatus::Pending, Transition::Admit { worker_id: "w".into() })
            .await
            .unwrap();
        store
            .transition(&job.id, JobStatus::Active, Transition::StartRendering { render_id: render_id.into() })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_capacity_and_fifo_promotion() {
        let h = harness(2).await;
        let ids: Vec<JobId> = (0..4).map(|i| JobId::from(format!("job-{}", i))).collect();

        assert_eq!(h.monitor.track(&ids[0], "r-0"), TrackOutcome::Tracking);
        assert_eq!(h.monitor.track(&ids[1], "r-1"), TrackOutcome::Tracking);
        assert_eq!(h.monitor.track(&ids[2], "r-2"), TrackOutcome::Queued { position: 1 });
        assert_eq!(h.monitor.track(&ids[3], "r-3"), TrackOutcome::Queued { position: 2 });
        assert_eq!(h.monitor.track(&ids[0], "r-0"), TrackOutcome::AlreadyTracked);
        assert_eq!(h.monitor.stats(), MonitorStats { tracked: 2, queued: 2, capacity: 2 });

        assert!(h.monitor.untrack(&ids[0]));
        assert!(h.monitor.is_tracking(&ids[2]));
        assert_eq!(h.monitor.stats().queued, 1);
    }

    #[tokio::test]
    async fn test_nothing_due_before_initial_interval() {
        let h = harness(5).await;
        let job = rendering_job(&h.store, "r-1").await;
        h.monitor.track(&job.id, "r-1");

        h.clock.advance(Duration::from_secs(59));
        assert_eq!(h.monitor.poll_due().await, 0);
        h.clock.advance(Duration::from_secs(1));
        assert_eq!(h.monitor.poll_due().await, 1);
        assert_eq!(h.monitor.attempts(&job.id), Some(1));
    }

    #[tokio::test]
    async fn test_backoff_is_non_decreasing_and_capped() {
        let h = harness(5).await;
        let job = rendering_job(&h.store, "r-1").await;
        h.monitor.track(&job.id, "r-1");

        let mut intervals = Vec::new();
        for _ in 0..8 {
            let due = h.monitor.next_due().unwrap();
            let wait = due.saturating_duration_since(h.clock.now());
            intervals.push(wait);
            h.clock.advance(wait);
            assert_eq!(h.monitor.poll_due().await, 1);
        }

        assert_eq!(intervals[0], Duration::from_secs(60));
        assert!(intervals.windows(2).all(|w| w[0] <= w[1]));
        assert!(intervals.iter().all(|d| *d <= Duration::from_secs(180)));
        assert_eq!(*intervals.last().unwrap(), Duration::from_secs(180));
    }

    #[tokio::test]
    async fn test_polled_completion_finalizes_and_frees_slot() {
        let h = harness(1).await;
        let a = rendering_job(&h.store, "r-a").await;
        let b = rendering_job(&h.store, "r-b").await;
        h.monitor.track(&a.id, "r-a");
        h.monitor.track(&b.id, "r-b");

        h.source.set("r-a", RenderStatus::Completed);
        h.clock.advance(Duration::from_secs(60));
        h.monitor.poll_due().await;

        let a = h.store.get(&a.id).await.unwrap();
        assert_eq!(a.status, JobStatus::Completed);
        assert_eq!(a.video_url.as_deref(), Some("https://cdn.example/r-a.mp4"));
        assert!(!h.monitor.is_tracking(&a.id));
        assert!(h.monitor.is_tracking(&b.id));
    }

    #[tokio::test]
    async fn test_polled_failure_fails_job() {
        let h = harness(5).await;
        let job = rendering_job(&h.store, "r-bad").await;
        h.monitor.track(&job.id, "r-bad");

        h.source.set("r-bad", RenderStatus::Failed);
        h.clock.advance(Duration::from_secs(60));
        h.monitor.poll_due().await;

        let job = h.store.get(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("render failed"));
        assert!(!h.monitor.is_tracking(&job.id));
    }

    #[tokio::test]
    async fn test_failed_store_write_keeps_render_tracked() {
        let repo = Arc::new(FlakyRepository::default());
        let h = harness_with_repo(5, repo.clone()).await;
        let job = rendering_job(&h.store, "r-1").await;
        h.monitor.track(&job.id, "r-1");

        h.source.set("r-1", RenderStatus::Completed);
        repo.fail_saves.store(1, Ordering::SeqCst);
        h.clock.advance(Duration::from_secs(60));
        assert_eq!(h.monitor.poll_due().await, 1);

        assert_eq!(h.store.get(&job.id).await.unwrap().status, JobStatus::Rendering);
        assert!(h.monitor.is_tracking(&job.id));
        assert_eq!(h.monitor.attempts(&job.id), Some(1));

        h.clock.advance(Duration::from_secs(180));
        assert_eq!(h.monitor.poll_due().await, 1);
        assert_eq!(h.store.get(&job.id).await.unwrap().status, JobStatus::Completed);
        assert!(!h.monitor.is_tracking(&job.id));
    }

    #[tokio::test]
    async fn test_timeout_is_retried_when_store_write_fails() {
        let repo = Arc::new(FlakyRepository::default());
        let h = harness_with_repo(5, repo.clone()).await;
        let job = rendering_job(&h.store, "r-slow").await;
        h.monitor.track(&job.id, "r-slow");

        for _ in 0..14 {
            h.clock.advance(Duration::from_secs(180));
            h.monitor.poll_due().await;
        }
        repo.fail_saves.store(1, Ordering::SeqCst);
        h.clock.advance(Duration::from_secs(180));
        assert_eq!(h.monitor.poll_due().await, 1);
        assert_eq!(h.store.get(&job.id).await.unwrap().status, JobStatus::Rendering);
        assert!(h.monitor.is_tracking(&job.id));

        h.clock.advance(Duration::from_secs(180));
        assert_eq!(h.monitor.poll_due().await, 1);
        assert_eq!(h.store.get(&job.id).await.unwrap().status, JobStatus::Failed);
        assert!(!h.monitor.is_tracking(&job.id));
    }

    #[tokio::test]
    async fn test_attempt_budget_fails_job() {
        let h = harness(5).await;
        let job = rendering_job(&h.store, "r-slow").await;
        h.monitor.track(&job.id, "r-slow");

        for _ in 0..15 {
            h.clock.advance(Duration::from_secs(180));
            assert_eq!(h.monitor.poll_due().await, 1);
        }

        let job = h.store.get(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.as_deref(),
            Some("render timeout after 15 checks, verify manually")
        );
        assert!(!h.monitor.is_tracking(&job.id));
        assert_eq!(*h.source.calls.lock().unwrap(), 15);

        h.clock.advance(Duration::from_secs(600));
        assert_eq!(h.monitor.poll_due().await, 0);
    }

    #[tokio::test]
    async fn test_untracked_job_is_not_polled() {
        let h = harness(5).await;
        let job = rendering_job(&h.store, "r-1").await;
        h.monitor.track(&job.id, "r-1");
        h.monitor.untrack(&job.id);

        h.clock.advance(Duration::from_secs(600));
        assert_eq!(h.monitor.poll_due().await, 0);
        assert!(h.monitor.next_due().is_none());
    }
}
