//! Queue and worker pool counters reported by `GET /queue/status`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobStatus;

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueueStatus {
    /// Number of jobs per status
    pub counts: BTreeMap<JobStatus, usize>,
    /// Jobs waiting for a worker slot
    pub queue_length: usize,
    /// Worker slots in use
    pub active_workers: usize,
    /// Worker slots free
    pub available_workers: usize,
    /// Configured worker pool size (N)
    pub max_workers: usize,
    /// Jobs being polled by the render monitor
    pub render_tracked: usize,
    /// Jobs waiting for a render monitor slot
    pub render_queued: usize,
    /// Render monitor capacity (M)
    pub render_capacity: usize,
    pub timestamp: DateTime<Utc>,
}

impl QueueStatus {
    pub fn count(&self, status: JobStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}
