//! Scheduler metrics.

use metrics::{counter, gauge};

pub mod names {
    pub const JOBS_ACTIVE: &str = "vgen_jobs_active";
    pub const QUEUE_LENGTH: &str = "vgen_queue_length";
    pub const RENDER_TRACKED: &str = "vgen_render_monitor_tracked";
    pub const RENDER_QUEUED: &str = "vgen_render_monitor_queued";
    pub const JOBS_SUBMITTED_TOTAL: &str = "vgen_jobs_submitted_total";
    pub const JOBS_FINISHED_TOTAL: &str = "vgen_jobs_finished_total";
    pub const WEBHOOK_EVENTS_TOTAL: &str = "vgen_webhook_events_total";
    pub const RENDER_POLLS_TOTAL: &str = "vgen_render_polls_total";
    pub const WORKFLOW_EXITS_TOTAL: &str = "vgen_workflow_exits_total";
}

pub fn set_admission(active: usize, queued: usize) {
    gauge!(names::JOBS_ACTIVE).set(active as f64);
    gauge!(names::QUEUE_LENGTH).set(queued as f64);
}

pub fn set_render_monitor(tracked: usize, queued: usize) {
    gauge!(names::RENDER_TRACKED).set(tracked as f64);
    gauge!(names::RENDER_QUEUED).set(queued as f64);
}

pub fn record_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_finished(status: &'static str) {
    counter!(names::JOBS_FINISHED_TOTAL, "status" => status).increment(1);
}

pub fn record_webhook(kind: &'static str, outcome: &'static str) {
    counter!(names::WEBHOOK_EVENTS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_render_poll(result: &'static str) {
    counter!(names::RENDER_POLLS_TOTAL, "result" => result).increment(1);
}

pub fn record_workflow_exit(outcome: &'static str) {
    counter!(names::WORKFLOW_EXITS_TOTAL, "outcome" => outcome).increment(1);
}
