//! The job store: sole writer of job state.
//!
//! Writes for one job are serialized through a per-job async mutex; writes
//! for different jobs never wait on each other. Inside the critical section
//! the authoritative copy is loaded from the repository (never the cache),
//! the pure transition from `vgen-models` is applied, the result is saved,
//! and the cache entry is replaced.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use vgen_models::{Job, JobId, JobStatus, LogEntry, StepEvent, Transition, TransitionError};

use crate::cache::JobCache;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::metrics;
use crate::repository::JobRepository;

/// Default page size for [`JobStore::list`].
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Largest page size accepted by [`JobStore::list`].
pub const MAX_LIST_LIMIT: usize = 500;

/// Filter for listing jobs. Results are ordered newest first.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl JobFilter {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Job store.
pub struct JobStore {
    repo: Arc<dyn JobRepository>,
    cache: JobCache,
    locks: Mutex<HashMap<JobId, Arc<AsyncMutex<()>>>>,
    render_index: RwLock<HashMap<String, JobId>>,
}

impl JobStore {
    /// Open a store over a repository, indexing render ids of existing jobs.
    pub async fn open(repo: Arc<dyn JobRepository>, config: StoreConfig) -> StoreResult<Self> {
        let store = Self {
            repo,
            cache: JobCache::new(&config),
            locks: Mutex::new(HashMap::new()),
            render_index: RwLock::new(HashMap::new()),
        };

        let jobs = store.repo.load_all().await?;
        let mut index = store.render_index.write().unwrap_or_else(|e| e.into_inner());
        for job in &jobs {
            if let Some(render_id) = &job.render_id {
                index.insert(render_id.clone(), job.id.clone());
            }
        }
        drop(index);

        info!(jobs = jobs.len(), "Job store opened");
        Ok(store)
    }

    fn lock_for(&self, id: &JobId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.clone()).or_default().clone()
    }

    fn index_render_id(&self, job: &Job) {
        if let Some(render_id) = &job.render_id {
            self.render_index
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(render_id.clone(), job.id.clone());
        }
    }

    /// Create a new pending job from caller parameters.
    pub async fn create(&self, parameters: serde_json::Value, total_steps: u32) -> StoreResult<Job> {
        self.insert(Job::new(parameters, total_steps)).await
    }

    /// Insert a prepared job (e.g. a retry carrying its retry count).
    pub async fn insert(&self, job: Job) -> StoreResult<Job> {
        self.repo.insert(&job).await?;
        self.cache.put(&job);
        metrics::record_operation("create", "ok");
        debug!(job_id = %job.id, "Job created");
        Ok(job)
    }

    /// Current state of a job.
    pub async fn get(&self, id: &JobId) -> StoreResult<Job> {
        if let Some(job) = self.cache.get(id) {
            metrics::record_cache_lookup(true);
            return Ok(job);
        }
        metrics::record_cache_lookup(false);

        let job = self
            .repo
            .load(id)
            .await?
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;
        self.cache.put(&job);
        Ok(job)
    }

    /// Look a job up by its render correlation id.
    pub async fn find_by_render_id(&self, render_id: &str) -> StoreResult<Job> {
        let id = self
            .render_index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(render_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("render {}", render_id)))?;
        self.get(&id).await
    }

    /// Run `mutate` on the authoritative copy inside the job's critical section.
    ///
    /// Nothing is written when `mutate` returns an error.
    async fn update<F>(&self, id: &JobId, operation: &'static str, mutate: F) -> StoreResult<Job>
    where
        F: FnOnce(&mut Job) -> Result<(), TransitionError>,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut job = self
            .repo
            .load(id)
            .await?
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;

        if let Err(e) = mutate(&mut job) {
            metrics::record_operation(operation, e.code());
            return Err(e.into());
        }

        self.cache.invalidate(id);
        self.repo.save(&job).await?;
        self.index_render_id(&job);
        self.cache.put(&job);
        metrics::record_operation(operation, "ok");
        Ok(job)
    }

    /// Apply a transition if the job is currently in `from`.
    ///
    /// Illegal transitions and state mismatches are returned as
    /// [`StoreError::Rejected`] and leave the job unchanged.
    pub async fn transition(&self, id: &JobId, from: JobStatus, transition: Transition) -> StoreResult<Job> {
        let target = transition.target();
        let result = self
            .update(id, "transition", |job| job.apply(from, transition))
            .await;

        match &result {
            Ok(_) => debug!(job_id = %id, from = %from, to = %target, "Job transitioned"),
            Err(StoreError::Rejected(e)) => {
                warn!(job_id = %id, from = %from, to = %target, reason = %e, "Transition rejected")
            }
            Err(_) => {}
        }
        result
    }

    /// Append a log entry. Allowed for terminal jobs.
    pub async fn append_log(&self, id: &JobId, entry: LogEntry) -> StoreResult<Job> {
        self.update(id, "append_log", |job| {
            job.push_log(entry);
            Ok(())
        })
        .await
    }

    /// Apply a subprocess step event (progress, current step, log line).
    pub async fn apply_step_event(&self, event: &StepEvent) -> StoreResult<Job> {
        self.update(&event.job_id, "step_event", |job| job.apply_step_event(event))
            .await
    }

    /// Jobs matching `filter`, newest first.
    pub async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .repo
            .load_all()
            .await?
            .into_iter()
            .filter(|job| filter.status.map_or(true, |s| job.status == s))
            .collect();

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let limit = filter.limit.clamp(1, MAX_LIST_LIMIT);
        Ok(jobs.into_iter().skip(filter.offset).take(limit).collect())
    }

    /// Every job in the given status, oldest first.
    pub async fn jobs_in(&self, status: JobStatus) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .repo
            .load_all()
            .await?
            .into_iter()
            .filter(|job| job.status == status)
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    /// Delete a terminal job.
    pub async fn delete(&self, id: &JobId) -> StoreResult<Job> {
        let lock = self.lock_for(id);
        let guard = lock.lock().await;

        let job = self
            .repo
            .load(id)
            .await?
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;
        if !job.is_terminal() {
            return Err(StoreError::conflict(format!(
                "job {} is {}; only terminal jobs can be deleted",
                id, job.status
            )));
        }

        self.repo.delete(id).await?;
        self.cache.invalidate(id);
        if let Some(render_id) = &job.render_id {
            self.render_index
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(render_id);
        }
        drop(guard);
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).remove(id);

        metrics::record_operation("delete", "ok");
        info!(job_id = %id, "Job deleted");
        Ok(job)
    }

    /// Number of jobs per status. Every status is present.
    pub async fn counts(&self) -> StoreResult<BTreeMap<JobStatus, usize>> {
        let mut counts: BTreeMap<JobStatus, usize> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for job in self.repo.load_all().await? {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Check the backing repository.
    pub async fn ping(&self) -> StoreResult<()> {
        self.repo.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use serde_json::json;
    use vgen_models::StepState;

    async fn store() -> JobStore {
        JobStore::open(Arc::new(MemoryRepository::new()), StoreConfig::default())
            .await
            .unwrap()
    }

    fn step(job_id: &JobId, sequence: u64, step_number: u32) -> StepEvent {
        StepEvent {
            job_id: job_id.clone(),
            sequence,
            step_number,
            step_name: format!("step {}", step_number),
            status: StepState::Completed,
            timestamp: None,
            details: None,
            render_id: None,
        }
    }

    async fn admitted(store: &JobStore) -> Job {
        let job = store.create(json!({}), 4).await.unwrap();
        store
            .transition(&job.id, JobStatus::Pending, Transition::Admit { worker_id: "worker-0".into() })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store().await;
        let job = store.create(json!({"topic": "heist"}), 6).await.unwrap();
        let loaded = store.get(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.parameters["topic"], "heist");
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = store().await;
        assert!(store.get(&JobId::from("nope")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rejected_transition_leaves_job_unchanged() {
        let store = store().await;
        let job = admitted(&store).await;

        let err = store
            .transition(&job.id, JobStatus::Rendering, Transition::Complete { video_url: "x".into() })
            .await
            .unwrap_err();
        assert!(err.is_rejected());
        assert_eq!(store.get(&job.id).await.unwrap(), job);
    }

    #[tokio::test]
    async fn test_render_index() {
        let store = store().await;
        let job = admitted(&store).await;
        store
            .transition(&job.id, JobStatus::Active, Transition::StartRendering { render_id: "r-7".into() })
            .await
            .unwrap();

        let found = store.find_by_render_id("r-7").await.unwrap();
        assert_eq!(found.id, job.id);
        assert!(store.find_by_render_id("r-8").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stale_step_event_is_rejected() {
        let store = store().await;
        let job = admitted(&store).await;
        store.apply_step_event(&step(&job.id, 5, 2)).await.unwrap();
        let before = store.get(&job.id).await.unwrap();

        let err = store.apply_step_event(&step(&job.id, 3, 3)).await.unwrap_err();
        assert_eq!(err.rejection().map(|e| e.code()), Some("stale_sequence"));
        assert_eq!(store.get(&job.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_write_invalidates_cache() {
        let store = store().await;
        let job = store.create(json!({}), 3).await.unwrap();
        store.get(&job.id).await.unwrap();
        store.append_log(&job.id, LogEntry::info("hello")).await.unwrap();
        assert_eq!(store.get(&job.id).await.unwrap().logs.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_transitions_single_winner() {
        let store = Arc::new(store().await);
        let job = store.create(json!({}), 3).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = job.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transition(&id, JobStatus::Pending, Transition::Admit { worker_id: format!("worker-{}", i) })
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.get(&job.id).await.unwrap().status, JobStatus::Active);
    }

    #[tokio::test]
    async fn test_delete_requires_terminal() {
        let store = store().await;
        let job = store.create(json!({}), 3).await.unwrap();
        assert!(matches!(store.delete(&job.id).await, Err(StoreError::Conflict(_))));

        store
            .transition(&job.id, JobStatus::Pending, Transition::Cancel { reason: None })
            .await
            .unwrap();
        store.delete(&job.id).await.unwrap();
        assert!(store.get(&job.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let store = store().await;
        for _ in 0..3 {
            store.create(json!({}), 3).await.unwrap();
        }
        let active = admitted(&store).await;

        let all = store.list(&JobFilter::default()).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let only_active = store
            .list(&JobFilter::default().with_status(JobStatus::Active))
            .await
            .unwrap();
        assert_eq!(only_active.len(), 1);
        assert_eq!(only_active[0].id, active.id);

        let page = store
            .list(&JobFilter { status: None, limit: 2, offset: 3 })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts[&JobStatus::Pending], 3);
        assert_eq!(counts[&JobStatus::Completed], 0);
    }

    #[tokio::test]
    async fn test_open_rebuilds_render_index() {
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryRepository::new());
        let mut job = Job::new(json!({}), 3);
        job.apply(JobStatus::Pending, Transition::Admit { worker_id: "w".into() }).unwrap();
        job.apply(JobStatus::Active, Transition::StartRendering { render_id: "r-1".into() })
            .unwrap();
        repo.insert(&job).await.unwrap();

        let store = JobStore::open(repo, StoreConfig::default()).await.unwrap();
        assert_eq!(store.find_by_render_id("r-1").await.unwrap().id, job.id);
    }
}
