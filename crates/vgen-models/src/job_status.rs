//! Job lifecycle states and the legal transitions between them.
//!
//! ```text
//! pending   -> active     (admission)
//! active    -> rendering  (subprocess reported a render id)
//! active    -> failed     (subprocess error, crash, timeout)
//! rendering -> completed  (render succeeded)
//! rendering -> failed     (render failed or monitor gave up)
//! pending | active -> cancelled
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Job processing status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a free worker slot
    #[default]
    Pending,
    /// Holding a worker slot; generation subprocess running
    Active,
    /// Subprocess finished; waiting on the external render service
    Rendering,
    /// Final video available
    Completed,
    /// Terminal failure
    Failed,
    /// Cancelled by a caller before rendering
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Active,
        JobStatus::Rendering,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Rendering => "rendering",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Check if the job is still live (pending, active or rendering).
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Active, Rendering)
                | (Active, Failed)
                | (Rendering, Completed)
                | (Rendering, Failed)
                | (Pending, Cancelled)
                | (Active, Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in JobStatus::ALL.into_iter().filter(JobStatus::is_terminal) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{} -> {} must be illegal", from, to);
            }
        }
    }

    #[test]
    fn test_legal_edges() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Active));
        assert!(JobStatus::Active.can_transition_to(JobStatus::Rendering));
        assert!(JobStatus::Rendering.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Rendering.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Active.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn test_illegal_edges() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Rendering));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Rendering.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Active.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Active.can_transition_to(JobStatus::Active));
    }

    #[test]
    fn test_from_str_roundtrip() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("stale".parse::<JobStatus>().is_err());
    }
}
