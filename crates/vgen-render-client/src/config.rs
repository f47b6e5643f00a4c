//! Render client configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RenderClientConfig {
    /// Base URL of the render service (no trailing slash)
    pub base_url: String,
    /// Bearer token, if the service requires one
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
}

impl Default for RenderClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RenderClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("RENDER_SERVICE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:8090".to_string()),
            api_key: std::env::var("RENDER_SERVICE_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            timeout: Duration::from_secs(
                std::env::var("RENDER_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_retries: std::env::var("RENDER_SERVICE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            base_delay: Duration::from_millis(500),
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(Duration::from_secs(10))
    }
}
