//! In-process fan-out of stream events.
//!
//! One `tokio::sync::broadcast` channel carries every event (global
//! subscribers); per-job channels are created on first subscription and
//! dropped once their last receiver goes away.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::trace;
use vgen_models::{JobId, StreamEvent};

/// Default buffer capacity per channel.
const DEFAULT_CAPACITY: usize = 256;

/// Registry of per-job and global subscribers.
pub struct EventBroadcaster {
    global: broadcast::Sender<StreamEvent>,
    jobs: Mutex<HashMap<JobId, broadcast::Sender<StreamEvent>>>,
    capacity: usize,
}

impl EventBroadcaster {
    /// Create a broadcaster with a given per-channel buffer.
    ///
    /// Slow receivers that fall more than `capacity` events behind observe
    /// `RecvError::Lagged` and should re-read the job.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (global, _) = broadcast::channel(capacity);
        Self {
            global,
            jobs: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Push an event to the job's subscribers (if it names a job) and to
    /// global subscribers. Events with no listeners are dropped.
    pub fn publish(&self, event: StreamEvent) {
        if let Some(job_id) = event.job_id() {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(sender) = jobs.get(job_id) {
                if sender.receiver_count() == 0 {
                    jobs.remove(job_id);
                } else {
                    let _ = sender.send(event.clone());
                    trace!(job_id = %job_id, kind = event.event_name(), "Published job event");
                }
            }
        }
        let _ = self.global.send(event);
    }

    /// Subscribe to one job's events.
    pub fn subscribe_job(&self, job_id: &JobId) -> broadcast::Receiver<StreamEvent> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.entry(job_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to every event.
    pub fn subscribe_global(&self) -> broadcast::Receiver<StreamEvent> {
        self.global.subscribe()
    }

    /// Drop per-job channels whose subscribers have all disconnected.
    /// Returns the number removed.
    pub fn prune(&self) -> usize {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, sender| sender.receiver_count() > 0);
        before - jobs.len()
    }

    /// Open per-job subscriptions across all jobs.
    pub fn job_subscriber_count(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|sender| sender.receiver_count())
            .sum()
    }

    pub fn global_subscriber_count(&self) -> usize {
        self.global.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
