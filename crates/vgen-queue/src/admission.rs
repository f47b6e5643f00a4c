//! Bounded worker pool with a FIFO wait queue.
//!
//! The controller only tracks slot occupancy and queue order. It performs no
//! I/O and never touches job records; the scheduler pairs each decision
//! with the matching job store transition.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::debug;
use vgen_models::JobId;

/// Result of asking for a worker slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A slot was assigned
    Admitted { worker_id: String },
    /// All slots are busy; 1-based position in the wait queue
    Queued { position: usize },
}

/// Slot and queue counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    pub max_workers: usize,
    pub active_workers: usize,
    pub available_workers: usize,
    pub queue_length: usize,
}

/// Admission controller for N concurrent jobs.
#[derive(Debug)]
pub struct AdmissionController {
    slots: Vec<Option<JobId>>,
    queue: VecDeque<JobId>,
}

impl AdmissionController {
    /// Create a controller with `max_workers` slots (at least one).
    pub fn new(max_workers: usize) -> Self {
        Self {
            slots: vec![None; max_workers.max(1)],
            queue: VecDeque::new(),
        }
    }

    fn worker_name(index: usize) -> String {
        format!("worker-{}", index)
    }

    fn slot_of(&self, job_id: &JobId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref() == Some(job_id))
    }

    /// Admit `job_id` if a slot is free, otherwise append it to the queue.
    ///
    /// Asking again for a job that already holds a slot or is queued returns
    /// its current placement without changing anything.
    pub fn try_admit(&mut self, job_id: &JobId) -> Admission {
        if let Some(index) = self.slot_of(job_id) {
            return Admission::Admitted {
                worker_id: Self::worker_name(index),
            };
        }
        if let Some(pos) = self.queue.iter().position(|queued| queued == job_id) {
            return Admission::Queued { position: pos + 1 };
        }

        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(job_id.clone());
                debug!(job_id = %job_id, worker = index, "Slot assigned");
                Admission::Admitted {
                    worker_id: Self::worker_name(index),
                }
            }
            None => {
                self.queue.push_back(job_id.clone());
                debug!(job_id = %job_id, position = self.queue.len(), "Job queued");
                Admission::Queued {
                    position: self.queue.len(),
                }
            }
        }
    }

    /// Free the slot held by `job_id` and hand it to the oldest queued job.
    ///
    /// Returns the newly admitted job and its worker id. Releasing a job that
    /// holds no slot is a no-op and returns `None`, so callers may release
    /// from several exit paths without double-freeing.
    pub fn release(&mut self, job_id: &JobId) -> Option<(JobId, String)> {
        let index = self.slot_of(job_id)?;
        self.slots[index] = None;
        debug!(job_id = %job_id, worker = index, "Slot released");

        let next = self.queue.pop_front()?;
        self.slots[index] = Some(next.clone());
        debug!(job_id = %next, worker = index, "Slot handed to queued job");
        Some((next, Self::worker_name(index)))
    }

    /// Remove a job from the wait queue. Returns false if it was not queued.
    pub fn remove_queued(&mut self, job_id: &JobId) -> bool {
        match self.queue.iter().position(|queued| queued == job_id) {
            Some(pos) => {
                self.queue.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn holds_slot(&self, job_id: &JobId) -> bool {
        self.slot_of(job_id).is_some()
    }

    pub fn is_queued(&self, job_id: &JobId) -> bool {
        self.queue.contains(job_id)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn max_workers(&self) -> usize {
        self.slots.len()
    }

    /// Queued job ids in admission order.
    pub fn queued(&self) -> Vec<JobId> {
        self.queue.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let active = self.active_count();
        AdmissionSnapshot {
            max_workers: self.max_workers(),
            active_workers: active,
            available_workers: self.max_workers() - active,
            queue_length: self.queue_len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> JobId {
        JobId::from(s)
    }

    #[test]
    fn test_admits_up_to_capacity_then_queues() {
        let mut ctl = AdmissionController::new(2);
        assert!(matches!(ctl.try_admit(&id("a")), Admission::Admitted { .. }));
        assert!(matches!(ctl.try_admit(&id("b")), Admission::Admitted { .. }));
        assert_eq!(ctl.try_admit(&id("c")), Admission::Queued { position: 1 });
        assert_eq!(ctl.try_admit(&id("d")), Admission::Queued { position: 2 });
        assert_eq!(ctl.active_count(), 2);
        assert_eq!(ctl.queue_len(), 2);
    }

    #[test]
    fn test_release_admits_fifo() {
        let mut ctl = AdmissionController::new(1);
        let Admission::Admitted { worker_id } = ctl.try_admit(&id("a")) else {
            panic!("expected admission");
        };
        ctl.try_admit(&id("b"));
        ctl.try_admit(&id("c"));

        let (next, next_worker) = ctl.release(&id("a")).unwrap();
        assert_eq!(next, id("b"));
        assert_eq!(next_worker, worker_id);
        assert!(ctl.holds_slot(&id("b")));
        assert_eq!(ctl.queued(), vec![id("c")]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut ctl = AdmissionController::new(1);
        ctl.try_admit(&id("a"));
        ctl.try_admit(&id("b"));
        assert!(ctl.release(&id("a")).is_some());
        assert!(ctl.release(&id("a")).is_none());
        assert!(ctl.holds_slot(&id("b")));
        assert_eq!(ctl.active_count(), 1);
    }

    #[test]
    fn test_repeat_admit_is_stable() {
        let mut ctl = AdmissionController::new(1);
        let first = ctl.try_admit(&id("a"));
        assert_eq!(ctl.try_admit(&id("a")), first);
        ctl.try_admit(&id("b"));
        assert_eq!(ctl.try_admit(&id("b")), Admission::Queued { position: 1 });
        assert_eq!(ctl.queue_len(), 1);
    }

    #[test]
    fn test_remove_queued_keeps_slots() {
        let mut ctl = AdmissionController::new(1);
        ctl.try_admit(&id("a"));
        ctl.try_admit(&id("b"));
        ctl.try_admit(&id("c"));

        assert!(ctl.remove_queued(&id("b")));
        assert!(!ctl.remove_queued(&id("b")));
        assert_eq!(ctl.queue_len(), 1);
        assert_eq!(ctl.active_count(), 1);

        let (next, _) = ctl.release(&id("a")).unwrap();
        assert_eq!(next, id("c"));
    }

    #[test]
    fn test_snapshot_counts() {
        let mut ctl = AdmissionController::new(3);
        ctl.try_admit(&id("a"));
        let snap = ctl.snapshot();
        assert_eq!(snap.max_workers, 3);
        assert_eq!(snap.active_workers, 1);
        assert_eq!(snap.available_workers, 2);
        assert_eq!(snap.queue_length, 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let ctl = AdmissionController::new(0);
        assert_eq!(ctl.max_workers(), 1);
    }
}
