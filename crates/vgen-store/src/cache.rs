//! Read-through job cache.
//!
//! Entries for terminal jobs live for `terminal_ttl`, entries for live jobs
//! for `live_ttl`. The store invalidates on every write, so the cache is
//! never the authority for a job's state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use vgen_models::{Job, JobId};

use crate::config::StoreConfig;

struct CachedJob {
    job: Job,
    expires_at: Instant,
}

impl CachedJob {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Bounded TTL cache keyed by job id.
pub struct JobCache {
    entries: Mutex<HashMap<JobId, CachedJob>>,
    live_ttl: Duration,
    terminal_ttl: Duration,
    capacity: usize,
}

impl JobCache {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            live_ttl: config.live_ttl,
            terminal_ttl: config.terminal_ttl,
            capacity: config.cache_capacity,
        }
    }

    /// TTL applied to a job given its state.
    pub fn ttl_for(&self, job: &Job) -> Duration {
        if job.is_terminal() {
            self.terminal_ttl
        } else {
            self.live_ttl
        }
    }

    /// Fresh cached copy, if any. Expired entries are dropped on lookup.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(id) {
            Some(cached) if cached.is_fresh(now) => Some(cached.job.clone()),
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, job: &Job) {
        if self.capacity == 0 {
            return;
        }
        let now = Instant::now();
        let expires_at = now + self.ttl_for(job);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if entries.len() >= self.capacity && !entries.contains_key(&job.id) {
            entries.retain(|_, cached| cached.is_fresh(now));
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, cached)| cached.expires_at)
                    .map(|(id, _)| id.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            job.id.clone(),
            CachedJob {
                job: job.clone(),
                expires_at,
            },
        );
    }

    pub fn invalidate(&self, id: &JobId) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vgen_models::{JobStatus, Transition};

    fn config(live_ms: u64, capacity: usize) -> StoreConfig {
        StoreConfig {
            live_ttl: Duration::from_millis(live_ms),
            terminal_ttl: Duration::from_secs(3600),
            cache_capacity: capacity,
        }
    }

    #[test]
    fn test_terminal_jobs_get_long_ttl() {
        let cache = JobCache::new(&config(50, 10));
        let live = Job::new(json!({}), 3);
        let mut done = Job::new(json!({}), 3);
        done.apply(JobStatus::Pending, Transition::Cancel { reason: None }).unwrap();

        assert_eq!(cache.ttl_for(&live), Duration::from_millis(50));
        assert_eq!(cache.ttl_for(&done), Duration::from_secs(3600));
    }

    #[test]
    fn test_live_entries_expire() {
        let cache = JobCache::new(&config(10, 10));
        let job = Job::new(json!({}), 3);
        cache.put(&job);
        assert!(cache.get(&job.id).is_some());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&job.id).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = JobCache::new(&config(60_000, 2));
        for _ in 0..5 {
            cache.put(&Job::new(json!({}), 3));
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalidate() {
        let cache = JobCache::new(&config(60_000, 2));
        let job = Job::new(json!({}), 3);
        cache.put(&job);
        cache.invalidate(&job.id);
        assert!(cache.get(&job.id).is_none());
    }
}
