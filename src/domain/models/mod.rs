//! Domain models.

pub mod agent;
pub mod change;
pub mod completion;
pub mod execution_log;
pub mod ralph;
pub mod spec;
pub mod task;

pub use agent::{ActiveAgent, AgentRole};
pub use change::{ChangeRecord, ChangeType, EntityType};
pub use completion::{
    CompletionCriteria, RawCompletionSpec, RawCriteria, TaskCompletionSpec, Verification,
};
pub use execution_log::{truncate_output, ExecutionLog, LOG_OUTPUT_MAX_CHARS};
pub use ralph::{RalphLoop, RalphLoopStatus, VerificationRecord};
pub use spec::{SourceType, Spec, SpecStatus};
pub use task::{FollowupCategory, Task, TaskPriority, TaskStatus};
