//! Agent roles and the active-agent registry row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role an agent plays within the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Coder,
    Reviewer,
    Tester,
    Qa,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coder => "coder",
            Self::Reviewer => "reviewer",
            Self::Tester => "tester",
            Self::Qa => "qa",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "coder" => Some(Self::Coder),
            "reviewer" => Some(Self::Reviewer),
            "tester" => Some(Self::Tester),
            "qa" => Some(Self::Qa),
            _ => None,
        }
    }

    pub fn all() -> [AgentRole; 4] {
        [Self::Coder, Self::Reviewer, Self::Tester, Self::Qa]
    }

    /// Tool allow-list handed to the agent CLI for this role.
    pub fn allowed_tools(&self) -> &'static [&'static str] {
        match self {
            Self::Coder => &["Read", "Write", "Edit", "Bash", "Glob", "Task"],
            Self::Reviewer => &["Read", "Glob", "Bash"],
            Self::Tester => &["Read", "Write", "Edit", "Bash"],
            Self::Qa => &["Read", "Bash"],
        }
    }
}

/// A currently-running pipeline stage, occupying one of the finite
/// execution slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAgent {
    /// Row id
    pub id: i64,
    /// Task being worked on (at most one agent per task)
    pub task_id: String,
    /// Role of the running stage
    pub agent_type: AgentRole,
    /// Slot number in 1..=N_max, unique across active rows
    pub slot: u32,
    /// OS pid when the agent runs out of process; pid-less rows are
    /// never auto-expired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Workspace the agent operates in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    /// When the stage started
    pub started_at: DateTime<Utc>,
}

impl ActiveAgent {
    /// Seconds since the stage started.
    pub fn elapsed_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}
