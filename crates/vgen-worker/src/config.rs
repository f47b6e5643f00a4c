//! Scheduler, supervisor and render monitor configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Admission and job lifecycle settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum concurrently active jobs (N)
    pub max_concurrent_jobs: usize,
    /// Internal workflow steps used for progress
    pub total_steps: u32,
    /// Maximum manual retries per job lineage
    pub max_retries: u32,
    /// Directory for the file-backed store; in-memory when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            total_steps: 6,
            max_retries: 3,
            data_dir: None,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("SCHEDULER_MAX_CONCURRENT_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            total_steps: std::env::var("SCHEDULER_TOTAL_STEPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6),
            max_retries: std::env::var("SCHEDULER_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            data_dir: std::env::var("SCHEDULER_DATA_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// How generation subprocesses are launched.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Program to run for each job
    pub command: String,
    /// Arguments for `command`; job inputs travel in the environment and stdin
    pub args: Vec<String>,
    /// Wall-clock limit per subprocess
    pub timeout: Duration,
    /// Parent directory for per-job working directories
    pub work_dir: PathBuf,
    /// Where the subprocess posts step events
    pub callback_url: String,
    /// Shared secret the subprocess signs its callbacks with
    pub webhook_secret: Option<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            command: "vgen-workflow".to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(3600), // 1 hour
            work_dir: PathBuf::from("/tmp/vgen"),
            callback_url: "http://127.0.0.1:8000/webhooks/step-update".to_string(),
            webhook_secret: None,
        }
    }
}

impl SupervisorConfig {
    /// Create config from environment variables.
    ///
    /// `callback_url` and `webhook_secret` are filled in by the server, which
    /// knows its public address and inbound secret.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            command: std::env::var("WORKFLOW_COMMAND").unwrap_or(defaults.command),
            args: std::env::var("WORKFLOW_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            timeout: Duration::from_secs(
                std::env::var("WORKFLOW_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            work_dir: std::env::var("WORKFLOW_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            callback_url: defaults.callback_url,
            webhook_secret: None,
        }
    }
}

/// Render monitor polling policy.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Jobs polled concurrently (M)
    pub capacity: usize,
    /// Delay before the first check
    pub initial_interval: Duration,
    /// Interval multiplier after each non-terminal check
    pub growth_factor: f64,
    /// Interval cap
    pub max_interval: Duration,
    /// Checks before giving up
    pub max_attempts: u32,
    /// Log every k-th unchanged check
    pub log_every: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            initial_interval: Duration::from_secs(60),
            growth_factor: 1.5,
            max_interval: Duration::from_secs(180),
            max_attempts: 15,
            log_every: 5,
        }
    }
}

impl MonitorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            capacity: std::env::var("RENDER_MONITOR_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            initial_interval: Duration::from_secs(
                std::env::var("RENDER_POLL_INITIAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            growth_factor: std::env::var("RENDER_POLL_GROWTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|g: &f64| *g >= 1.0)
                .unwrap_or(1.5),
            max_interval: Duration::from_secs(
                std::env::var("RENDER_POLL_MAX_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(180),
            ),
            max_attempts: std::env::var("RENDER_POLL_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),
            log_every: std::env::var("RENDER_POLL_LOG_EVERY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }

    /// Interval after `current`: grown by the factor, never above the cap,
    /// never below `current`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let grown = current.mul_f64(self.growth_factor.max(1.0));
        grown.min(self.max_interval).max(current.min(self.max_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_interval_grows_to_cap() {
        let config = MonitorConfig::default();
        let mut interval = config.initial_interval;
        let mut seen = vec![interval];
        for _ in 0..6 {
            interval = config.next_interval(interval);
            seen.push(interval);
        }
        assert_eq!(seen[1], Duration::from_secs(90));
        assert_eq!(seen[2], Duration::from_secs(135));
        assert_eq!(seen[3], Duration::from_secs(180));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|d| *d <= config.max_interval));
    }
}
