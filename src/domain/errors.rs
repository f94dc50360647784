//! Domain errors for the SpecForge orchestrator.

use thiserror::Error;

/// Classified workspace failures from the version-control layer.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace already exists: {0}")]
    AlreadyExists(String),

    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Workspace has uncommitted changes: {0}")]
    Dirty(String),

    #[error("Git operation failed: {0}")]
    Vcs(String),
}

/// Domain-level errors surfaced uniformly across the system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not a SpecForge project (no .specforge directory found)")]
    NotAProject,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task {0} has unmet dependencies")]
    DependencyNotMet(String),

    #[error("All {0} agent slots are in use")]
    SlotsExhausted(u32),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("Merge failed: {0}")]
    MergeFailed(String),

    #[error("Agent execution timed out after {0}s")]
    AgentTimeout(u64),

    #[error("Agent executable not found: {0}")]
    AgentNotInstalled(String),

    #[error("Agent produced unusable output: {0}")]
    AgentBadOutput(String),

    #[error("Store corruption: {0}")]
    StoreCorruption(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Change log import failed: {0}")]
    ChangeLogImport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Shorthand for the common not-found cases.
    pub fn spec_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: "Spec", id: id.into() }
    }

    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: "Task", id: id.into() }
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return DomainError::DuplicateId(db_err.message().to_string());
            }
        }
        DomainError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Database(format!("io: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = DomainError::task_not_found("TASK-001");
        assert_eq!(err.to_string(), "Task not found: TASK-001");
    }

    #[test]
    fn test_workspace_error_wraps() {
        let err: DomainError = WorkspaceError::Dirty(".worktrees/t1".into()).into();
        assert!(matches!(err, DomainError::Workspace(WorkspaceError::Dirty(_))));
    }
}
