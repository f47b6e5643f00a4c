//! Job store configuration.

use std::time::Duration;

/// Cache configuration for the job store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// TTL for cached live jobs (pending, active, rendering)
    pub live_ttl: Duration,
    /// TTL for cached terminal jobs
    pub terminal_ttl: Duration,
    /// Maximum number of cached jobs
    pub cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            live_ttl: Duration::from_millis(2000),
            terminal_ttl: Duration::from_secs(3600),
            cache_capacity: 10_000,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            live_ttl: Duration::from_millis(
                std::env::var("STORE_LIVE_TTL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            terminal_ttl: Duration::from_secs(
                std::env::var("STORE_TERMINAL_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            cache_capacity: std::env::var("STORE_CACHE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),
        }
    }
}
