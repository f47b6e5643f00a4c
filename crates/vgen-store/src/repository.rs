//! Durable job persistence.
//!
//! The [`JobRepository`] trait is the only place job documents are read from
//! or written to. Two backends are provided:
//! - [`MemoryRepository`] for tests and ephemeral deployments
//! - [`FileRepository`], one JSON document per job under a data directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use vgen_models::{Job, JobId};

use crate::error::{StoreError, StoreResult};

/// Storage backend for job documents.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job. Fails if the id is taken.
    async fn insert(&self, job: &Job) -> StoreResult<()>;

    /// Load a job by id.
    async fn load(&self, id: &JobId) -> StoreResult<Option<Job>>;

    /// Overwrite an existing job.
    async fn save(&self, job: &Job) -> StoreResult<()>;

    /// Remove a job. Returns false if it did not exist.
    async fn delete(&self, id: &JobId) -> StoreResult<bool>;

    /// Load every job.
    async fn load_all(&self) -> StoreResult<Vec<Job>>;

    /// Check the backend is reachable.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// In-memory repository.
#[derive(Default)]
pub struct MemoryRepository {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryRepository {
    async fn insert(&self, job: &Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn load(&self, id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn save(&self, job: &Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(StoreError::not_found(job.id.as_str())),
        }
    }

    async fn delete(&self, id: &JobId) -> StoreResult<bool> {
        Ok(self.jobs.write().await.remove(id).is_some())
    }

    async fn load_all(&self) -> StoreResult<Vec<Job>> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }
}

/// File-backed repository.
///
/// Every write goes to `<id>.json.tmp` first and is renamed over `<id>.json`,
/// so a crash mid-write leaves the previous document intact. Documents are
/// mirrored in memory after [`FileRepository::open`] reads the directory.
pub struct FileRepository {
    dir: PathBuf,
    mirror: MemoryRepository,
}

impl FileRepository {
    /// Open (creating if needed) a data directory and load existing jobs.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mirror = MemoryRepository::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut loaded = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Job>(&bytes) {
                Ok(job) => {
                    mirror.insert(&job).await?;
                    loaded += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable job document");
                }
            }
        }

        debug!(dir = %dir.display(), jobs = loaded, "Opened file job repository");
        Ok(Self { dir, mirror })
    }

    fn path_for(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(id.as_str())))
    }

    async fn write_document(&self, job: &Job) -> StoreResult<()> {
        let path = self.path_for(&job.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(job)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Keep ids usable as file names.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl JobRepository for FileRepository {
    async fn insert(&self, job: &Job) -> StoreResult<()> {
        if self.mirror.load(&job.id).await?.is_some() {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        self.write_document(job).await?;
        self.mirror.insert(job).await
    }

    async fn load(&self, id: &JobId) -> StoreResult<Option<Job>> {
        self.mirror.load(id).await
    }

    async fn save(&self, job: &Job) -> StoreResult<()> {
        if self.mirror.load(&job.id).await?.is_none() {
            return Err(StoreError::not_found(job.id.as_str()));
        }
        self.write_document(job).await?;
        self.mirror.save(job).await
    }

    async fn delete(&self, id: &JobId) -> StoreResult<bool> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.mirror.delete(id).await
    }

    async fn load_all(&self) -> StoreResult<Vec<Job>> {
        self.mirror.load_all().await
    }

    async fn ping(&self) -> StoreResult<()> {
        tokio::fs::metadata(&self.dir).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vgen_models::{JobStatus, Transition};

    #[tokio::test]
    async fn test_memory_insert_is_unique() {
        let repo = MemoryRepository::new();
        let job = Job::new(json!({}), 3);
        repo.insert(&job).await.unwrap();
        assert!(matches!(repo.insert(&job).await, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_memory_save_requires_existing() {
        let repo = MemoryRepository::new();
        let job = Job::new(json!({}), 3);
        assert!(repo.save(&job).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_file_repository_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = Job::new(json!({"topic": "noir"}), 3);
        {
            let repo = FileRepository::open(dir.path()).await.unwrap();
            repo.insert(&job).await.unwrap();
            job.apply(JobStatus::Pending, Transition::Admit { worker_id: "worker-0".into() })
                .unwrap();
            repo.save(&job).await.unwrap();
        }

        let reopened = FileRepository::open(dir.path()).await.unwrap();
        let loaded = reopened.load(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded, job);
        assert_eq!(reopened.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_repository_skips_corrupt_documents() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{not json").await.unwrap();
        let repo = FileRepository::open(dir.path()).await.unwrap();
        assert!(repo.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_repository_delete() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRepository::open(dir.path()).await.unwrap();
        let job = Job::new(json!({}), 3);
        repo.insert(&job).await.unwrap();
        assert!(repo.delete(&job.id).await.unwrap());
        assert!(!repo.delete(&job.id).await.unwrap());
        assert!(FileRepository::open(dir.path()).await.unwrap().load_all().await.unwrap().is_empty());
    }
}
