//! Job store metrics.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    /// Store operations by operation and outcome.
    pub const OPERATIONS_TOTAL: &str = "vgen_store_operations_total";

    /// Cache lookups by result (hit/miss).
    pub const CACHE_LOOKUPS_TOTAL: &str = "vgen_store_cache_lookups_total";
}

pub fn record_operation(operation: &'static str, outcome: &'static str) {
    counter!(names::OPERATIONS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(names::CACHE_LOOKUPS_TOTAL, "result" => result).increment(1);
}
