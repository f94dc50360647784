//! Ralph loops: the observable record of a stage's bounded retry loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentRole;

/// Status of a Ralph loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RalphLoopStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RalphLoopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Outcome of one verification attempt within a loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Iteration number this record belongs to (1-based)
    pub iteration: u32,
    /// Whether the promise string was found in the output
    pub promise_found: bool,
    /// Whether the full verification passed
    pub verified: bool,
    /// Short explanation of the result
    pub reason: String,
}

/// Observable record of a running stage's iteration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RalphLoop {
    /// Loop id
    pub id: Uuid,
    /// Task the loop belongs to
    pub task_id: String,
    /// Stage role being iterated
    pub agent_type: AgentRole,
    /// Iterations completed so far
    pub iteration: u32,
    /// Stage iteration budget
    pub max_iterations: u32,
    /// Loop status; at most one running loop per (task, role)
    pub status: RalphLoopStatus,
    /// Append-only verification history in iteration order
    pub verification_results: Vec<VerificationRecord>,
    /// When the loop started
    pub started_at: DateTime<Utc>,
    /// When the loop was last updated
    pub updated_at: DateTime<Utc>,
}

impl RalphLoop {
    /// Create a fresh running loop.
    pub fn new(task_id: impl Into<String>, agent_type: AgentRole, max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id: task_id.into(),
            agent_type,
            iteration: 0,
            max_iterations,
            status: RalphLoopStatus::Running,
            verification_results: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Seconds elapsed since the loop started.
    pub fn elapsed_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }

    /// Progress as a percentage of the iteration budget.
    pub fn progress_percent(&self) -> f64 {
        if self.max_iterations == 0 {
            return 0.0;
        }
        f64::from(self.iteration) * 100.0 / f64::from(self.max_iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_loop_is_running() {
        let lp = RalphLoop::new("TASK-1", AgentRole::Coder, 3);
        assert_eq!(lp.status, RalphLoopStatus::Running);
        assert_eq!(lp.iteration, 0);
        assert!(lp.verification_results.is_empty());
    }

    #[test]
    fn test_progress_percent() {
        let mut lp = RalphLoop::new("TASK-1", AgentRole::Coder, 4);
        assert!((lp.progress_percent() - 0.0).abs() < f64::EPSILON);
        lp.iteration = 1;
        assert!((lp.progress_percent() - 25.0).abs() < f64::EPSILON);
        lp.iteration = 4;
        assert!((lp.progress_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_status_round_trip_accepts_both_spellings() {
        assert_eq!(
            RalphLoopStatus::from_str("canceled"),
            Some(RalphLoopStatus::Cancelled)
        );
        assert_eq!(
            RalphLoopStatus::from_str("cancelled"),
            Some(RalphLoopStatus::Cancelled)
        );
        for s in ["running", "completed", "cancelled", "failed"] {
            assert_eq!(RalphLoopStatus::from_str(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RalphLoopStatus::Running.is_terminal());
        assert!(RalphLoopStatus::Completed.is_terminal());
        assert!(RalphLoopStatus::Cancelled.is_terminal());
        assert!(RalphLoopStatus::Failed.is_terminal());
    }
}
