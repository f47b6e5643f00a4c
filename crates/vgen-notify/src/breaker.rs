//! Per-subscriber circuit breaker.
//!
//! After `threshold` consecutive failed deliveries a subscriber is paused for
//! `cooldown`. Once the cooldown passes one delivery is let through; success
//! closes the breaker, failure re-opens it for another cooldown.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Breaker state for every subscriber.
#[derive(Debug)]
pub struct CircuitBreakers {
    states: Mutex<HashMap<String, BreakerState>>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakers {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// Whether a delivery to `subscriber_id` may be attempted now.
    pub fn allow(&self, subscriber_id: &str) -> bool {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        match states.get(subscriber_id).and_then(|s| s.open_until) {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    pub fn record_success(&self, subscriber_id: &str) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(subscriber_id);
    }

    /// Record a failed delivery. Returns true if this opened the breaker.
    pub fn record_failure(&self, subscriber_id: &str) -> bool {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states.entry(subscriber_id.to_string()).or_default();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            return true;
        }
        false
    }

    pub fn is_open(&self, subscriber_id: &str) -> bool {
        !self.allow(subscriber_id)
    }

    pub fn forget(&self, subscriber_id: &str) {
        self.record_success(subscriber_id);
    }

    /// Subscribers currently paused.
    pub fn open_count(&self) -> usize {
        let now = Instant::now();
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|s| s.open_until.is_some_and(|until| now < until))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let breakers = CircuitBreakers::new(3, Duration::from_secs(60));
        assert!(!breakers.record_failure("s"));
        assert!(!breakers.record_failure("s"));
        assert!(breakers.allow("s"));
        assert!(breakers.record_failure("s"));
        assert!(breakers.is_open("s"));
        assert!(breakers.allow("other"));
        assert_eq!(breakers.open_count(), 1);
    }

    #[test]
    fn test_success_resets() {
        let breakers = CircuitBreakers::new(2, Duration::from_secs(60));
        breakers.record_failure("s");
        breakers.record_success("s");
        assert!(!breakers.record_failure("s"));
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let breakers = CircuitBreakers::new(1, Duration::from_millis(5));
        assert!(breakers.record_failure("s"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(breakers.allow("s"));
        assert!(breakers.record_failure("s"));
        assert!(breakers.is_open("s"));
    }
}
