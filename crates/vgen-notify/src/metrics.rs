//! Notifier metrics.

use metrics::counter;

pub mod names {
    /// Deliveries by outcome (delivered, failed, skipped).
    pub const DELIVERIES_TOTAL: &str = "vgen_notify_deliveries_total";

    /// Individual HTTP attempts that failed.
    pub const ATTEMPT_FAILURES_TOTAL: &str = "vgen_notify_attempt_failures_total";

    /// Times a subscriber breaker opened.
    pub const BREAKER_OPENED_TOTAL: &str = "vgen_notify_breaker_opened_total";
}

pub fn record_delivery(outcome: &'static str) {
    counter!(names::DELIVERIES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_attempt_failure() {
    counter!(names::ATTEMPT_FAILURES_TOTAL).increment(1);
}

pub fn record_breaker_opened() {
    counter!(names::BREAKER_OPENED_TOTAL).increment(1);
}
