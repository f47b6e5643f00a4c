//! Notifier configuration.

use std::time::Duration;

/// Longest wait between two delivery attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Outbound notifier configuration.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Attempts per delivery, including the first
    pub max_attempts: u32,
    /// Base delay for exponential backoff (doubles each attempt)
    pub base_delay: Duration,
    /// Consecutive failed deliveries before a subscriber is paused
    pub breaker_threshold: u32,
    /// How long a paused subscriber stays paused
    pub breaker_cooldown: Duration,
    /// Default HMAC key for subscribers without their own secret
    pub signing_secret: Option<String>,
    /// Subscriber URLs registered at start-up
    pub subscribers: Vec<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 4,
            base_delay: Duration::from_millis(1000),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(300),
            signing_secret: None,
            subscribers: Vec::new(),
        }
    }
}

impl NotifierConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            timeout: Duration::from_secs(
                std::env::var("NOTIFY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            max_attempts: std::env::var("NOTIFY_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            base_delay: Duration::from_millis(
                std::env::var("NOTIFY_BASE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            breaker_threshold: std::env::var("NOTIFY_BREAKER_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            breaker_cooldown: Duration::from_secs(
                std::env::var("NOTIFY_BREAKER_COOLDOWN_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            signing_secret: std::env::var("NOTIFY_SIGNING_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            subscribers: std::env::var("NOTIFY_SUBSCRIBERS")
                .map(|s| {
                    s.split(',')
                        .map(|u| u.trim().to_string())
                        .filter(|u| !u.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` attempts so far.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = NotifierConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(20), MAX_RETRY_DELAY);
    }
}
