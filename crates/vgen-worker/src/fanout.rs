//! Pushes job changes to stream subscribers and external subscribers.

use std::sync::Arc;

use vgen_models::{Job, StreamEvent};
use vgen_notify::{NotificationEvent, Notifier};
use vgen_queue::EventBroadcaster;

use crate::metrics;

/// Broadcaster plus optional outbound notifier.
pub struct Fanout {
    broadcaster: Arc<EventBroadcaster>,
    notifier: Option<Notifier>,
}

impl Fanout {
    pub fn new(broadcaster: Arc<EventBroadcaster>, notifier: Option<Notifier>) -> Self {
        Self {
            broadcaster,
            notifier,
        }
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn notifier(&self) -> Option<&Notifier> {
        self.notifier.as_ref()
    }

    /// Publish the newest log line and the job's status/progress.
    pub fn job_updated(&self, job: &Job) {
        if let Some(entry) = job.logs.last() {
            self.broadcaster
                .publish(StreamEvent::log(&job.id, entry.clone()));
        }
        self.broadcaster.publish(StreamEvent::job_updated(job));
    }

    /// Publish only the newest log line.
    pub fn log_appended(&self, job: &Job) {
        if let Some(entry) = job.logs.last() {
            self.broadcaster
                .publish(StreamEvent::log(&job.id, entry.clone()));
        }
    }

    /// Publish a status change and notify external subscribers.
    pub fn job_transitioned(&self, job: &Job) {
        self.job_updated(job);
        if job.is_terminal() {
            metrics::record_finished(job.status.as_str());
        }
        if let (Some(notifier), Some(event)) = (&self.notifier, NotificationEvent::for_status(job.status)) {
            notifier.notify(event, job);
        }
    }
}
