//! Task domain model.
//!
//! Tasks are the atomic units executed by the engine. They form a DAG
//! through same-spec dependencies.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::completion::TaskCompletionSpec;

/// Status of a task in the execution workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet picked up (or reset after a pipeline failure)
    Todo,
    /// Coder stage in progress
    Implementing,
    /// Tester stage in progress
    Testing,
    /// Reviewer or QA stage in progress
    Reviewing,
    /// All stages passed
    Done,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Todo
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Implementing => "implementing",
            Self::Testing => "testing",
            Self::Reviewing => "reviewing",
            Self::Done => "done",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "todo" => Some(Self::Todo),
            "implementing" => Some(Self::Implementing),
            "testing" => Some(Self::Testing),
            "reviewing" => Some(Self::Reviewing),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn all() -> [TaskStatus; 5] {
        [
            Self::Todo,
            Self::Implementing,
            Self::Testing,
            Self::Reviewing,
            Self::Done,
        ]
    }
}

/// Priority level: 1 is highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    pub fn from_i64(n: i64) -> Option<Self> {
        match n {
            1 => Some(Self::High),
            2 => Some(Self::Medium),
            3 => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

// Priorities travel as their numeric rank in snapshots and JSON output.
impl Serialize for TaskPriority {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for TaskPriority {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let n = i64::deserialize(deserializer)?;
        TaskPriority::from_i64(n)
            .ok_or_else(|| serde::de::Error::custom(format!("priority out of range: {n}")))
    }
}

/// An atomic unit of work executed by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier (stable string, e.g. "TASK-001")
    pub id: String,
    /// Owning spec (cascading delete)
    pub spec_id: String,
    /// Human-readable title
    pub title: String,
    /// Detailed description fed to agents
    #[serde(default)]
    pub description: String,
    /// Current workflow status
    pub status: TaskStatus,
    /// Priority, 1 highest
    pub priority: TaskPriority,
    /// Ordered set of same-spec task ids this depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Agent role assigned to the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Workspace path while executing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    /// Total pipeline iterations spent on this task
    #[serde(default)]
    pub iteration: u32,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata (failure bookkeeping lands here)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Optional definition of done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_spec: Option<TaskCompletionSpec>,
}

impl Task {
    /// Create a new todo task.
    pub fn new(
        id: impl Into<String>,
        spec_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            spec_id: spec_id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            dependencies: Vec::new(),
            assignee: None,
            worktree: None,
            iteration: 0,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
            completion_spec: None,
        }
    }

    /// Set the description (builder method).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the priority (builder method).
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a dependency, ignoring duplicates and self-references.
    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        if task_id != self.id && !self.dependencies.contains(&task_id) {
            self.dependencies.push(task_id);
        }
        self
    }

    /// Set the assignee role (builder method).
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    /// Attach a completion spec (builder method).
    pub fn with_completion_spec(mut self, spec: TaskCompletionSpec) -> Self {
        self.completion_spec = Some(spec);
        self
    }

    /// Mark the task as updated now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Validate task shape before persistence.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("Task id cannot be empty".to_string());
        }
        if self.spec_id.is_empty() {
            return Err("Task spec_id cannot be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("Task title cannot be empty".to_string());
        }
        if self.dependencies.iter().any(|d| d == &self.id) {
            return Err("Task cannot depend on itself".to_string());
        }
        Ok(())
    }

    /// Record why the pipeline gave up, truncating the reason so metadata
    /// stays bounded.
    pub fn record_failure(&mut self, stage: &str, reason: &str) {
        const MAX_REASON_CHARS: usize = 2000;
        let truncated: String = reason.chars().take(MAX_REASON_CHARS).collect();
        self.metadata
            .insert("failure_stage".to_string(), serde_json::json!(stage));
        self.metadata
            .insert("failure_reason".to_string(), serde_json::json!(truncated));
    }
}

/// Follow-up categories detected from task id prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowupCategory {
    Placeholder,
    TechDebt,
    Refactor,
    TestGap,
    EdgeCase,
    Doc,
    Followup,
}

impl FollowupCategory {
    /// Detect the category from a task id prefix.
    pub fn from_task_id(id: &str) -> Self {
        const PREFIXES: [(&str, FollowupCategory); 6] = [
            ("PLACEHOLDER-", FollowupCategory::Placeholder),
            ("TECH-DEBT-", FollowupCategory::TechDebt),
            ("REFACTOR-", FollowupCategory::Refactor),
            ("TEST-GAP-", FollowupCategory::TestGap),
            ("EDGE-CASE-", FollowupCategory::EdgeCase),
            ("DOC-", FollowupCategory::Doc),
        ];
        for (prefix, category) in PREFIXES {
            if id.starts_with(prefix) {
                return category;
            }
        }
        Self::Followup
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placeholder => "placeholder",
            Self::TechDebt => "tech-debt",
            Self::Refactor => "refactor",
            Self::TestGap => "test-gap",
            Self::EdgeCase => "edge-case",
            Self::Doc => "doc",
            Self::Followup => "followup",
        }
    }
}
