//! Immutable execution audit rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AgentRole;

/// Output stored in a log row is truncated to this many characters.
pub const LOG_OUTPUT_MAX_CHARS: usize = 10_000;

/// One append-only audit row describing a single agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    /// Row id
    pub id: i64,
    /// Task the invocation belonged to
    pub task_id: String,
    /// Role that ran
    pub agent_type: AgentRole,
    /// Stage name, e.g. "Implementation"
    pub action: String,
    /// Captured output (truncated)
    pub output: String,
    /// Whether the iteration was judged successful
    pub success: bool,
    /// Wall-clock duration of the invocation
    pub duration_ms: i64,
    /// When the row was written
    pub created_at: DateTime<Utc>,
}

/// Truncate agent output for storage, marking the cut when one happens.
pub fn truncate_output(output: &str) -> String {
    if output.chars().count() <= LOG_OUTPUT_MAX_CHARS {
        return output.to_string();
    }
    let mut truncated: String = output.chars().take(LOG_OUTPUT_MAX_CHARS).collect();
    truncated.push_str("\n… [truncated]");
    truncated
}
