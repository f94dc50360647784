//! The scheduler: parallel pipeline execution over the task graph.
//!
//! Owns the pending queue and the in-flight map explicitly. After each
//! completion the ready set is re-queried, because agents create
//! follow-up tasks while the run is in progress. Merges are serialized
//! by a single exclusive lock no matter how many workers run.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskStatus};
use crate::services::{MergeOrchestrator, Store, WorkspaceManager};

use super::pipeline::{Pipeline, PipelineEnd};

/// Which tasks an execution run covers.
#[derive(Debug, Clone)]
pub enum ExecutionFilter {
    /// Every ready task in the project
    AllReady,
    /// Ready tasks of one spec
    BySpec(String),
    /// One specific task
    Single(String),
}

impl ExecutionFilter {
    fn spec_id(&self) -> Option<&str> {
        match self {
            Self::BySpec(spec_id) => Some(spec_id),
            Self::AllReady | Self::Single(_) => None,
        }
    }
}

/// Merge bookkeeping for one task, including the interval the merge
/// lock was held so serialization is auditable.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub merged: bool,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cleaned_up: bool,
}

/// Outcome of one task's run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub title: String,
    pub success: bool,
    pub final_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a whole execution run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    pub outcomes: Vec<TaskOutcome>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub parallel_slots: usize,
}

impl ExecutionSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn no_work(&self) -> bool {
        self.total == 0
    }
}

/// Default worker parallelism.
pub const DEFAULT_MAX_PARALLEL: usize = 6;

/// Top-level execution loop.
pub struct Scheduler {
    store: Arc<Store>,
    pipeline: Arc<Pipeline>,
    workspaces: Arc<WorkspaceManager>,
    merger: Arc<MergeOrchestrator>,
    base_branch: String,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        pipeline: Arc<Pipeline>,
        workspaces: Arc<WorkspaceManager>,
        merger: Arc<MergeOrchestrator>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            store,
            pipeline,
            workspaces,
            merger,
            base_branch: base_branch.into(),
        }
    }

    /// Run every task selected by the filter, respecting dependencies
    /// and the parallelism cap.
    #[instrument(skip(self), fields(max_parallel))]
    pub async fn execute(
        &self,
        filter: ExecutionFilter,
        max_parallel: usize,
    ) -> DomainResult<ExecutionSummary> {
        let max_parallel = max_parallel.max(1);
        let mut pending = self.initial_tasks(&filter).await?;

        let mut summary = ExecutionSummary {
            parallel_slots: max_parallel,
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(summary);
        }

        sort_by_priority(&mut pending);

        let merge_lock = Arc::new(Mutex::new(()));
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut join_set: JoinSet<TaskOutcome> = JoinSet::new();

        loop {
            while in_flight.len() < max_parallel && !pending.is_empty() {
                let task = pending.remove(0);
                info!(task_id = %task.id, title = %task.title, "Starting task");
                in_flight.insert(task.id.clone());
                join_set.spawn(self.spawn_worker(task, Arc::clone(&merge_lock)));
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };

            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    // A panicking worker is recorded, never propagated to
                    // its peers.
                    warn!(error = %join_err, "Worker task panicked");
                    TaskOutcome {
                        task_id: "unknown".into(),
                        title: String::new(),
                        success: false,
                        final_status: "error".into(),
                        merge: None,
                        error: Some(join_err.to_string()),
                    }
                }
            };

            in_flight.remove(&outcome.task_id);
            completed.insert(outcome.task_id.clone());
            summary.outcomes.push(outcome);

            // Dynamic discovery: the graph may have grown while this task
            // ran, and finishing it may have unblocked dependents.
            let newly_ready = self.store.get_ready_tasks(filter.spec_id()).await?;
            for task in newly_ready {
                if completed.contains(&task.id)
                    || in_flight.contains(&task.id)
                    || pending.iter().any(|p| p.id == task.id)
                {
                    continue;
                }
                if matches!(filter, ExecutionFilter::Single(_)) {
                    continue;
                }
                info!(task_id = %task.id, "New task ready");
                pending.push(task);
            }
            sort_by_priority(&mut pending);
        }

        summary.total = summary.outcomes.len();
        summary.successful = summary.outcomes.iter().filter(|o| o.success).count();
        summary.failed = summary.total - summary.successful;
        Ok(summary)
    }

    async fn initial_tasks(&self, filter: &ExecutionFilter) -> DomainResult<Vec<Task>> {
        match filter {
            ExecutionFilter::AllReady => self.store.get_ready_tasks(None).await,
            ExecutionFilter::BySpec(spec_id) => self.store.get_ready_tasks(Some(spec_id)).await,
            ExecutionFilter::Single(task_id) => {
                let task = self
                    .store
                    .get_task(task_id, true)
                    .await?
                    .ok_or_else(|| DomainError::task_not_found(task_id))?;
                if self.store.is_task_blocked(&task).await? {
                    return Err(DomainError::DependencyNotMet(task_id.clone()));
                }
                Ok(vec![task])
            }
        }
    }

    /// Build the worker future for one task. All failures are folded
    /// into the outcome so one task can never cancel its peers.
    fn spawn_worker(
        &self,
        task: Task,
        merge_lock: Arc<Mutex<()>>,
    ) -> impl std::future::Future<Output = TaskOutcome> + Send + 'static {
        let store = Arc::clone(&self.store);
        let pipeline = Arc::clone(&self.pipeline);
        let workspaces = Arc::clone(&self.workspaces);
        let merger = Arc::clone(&self.merger);
        let base_branch = self.base_branch.clone();

        async move {
            let mut outcome = TaskOutcome {
                task_id: task.id.clone(),
                title: task.title.clone(),
                success: false,
                final_status: task.status.as_str().to_string(),
                merge: None,
                error: None,
            };

            let workspace = match workspaces.create_workspace(&task.id, &base_branch).await {
                Ok(path) => path,
                Err(err) => {
                    outcome.error = Some(format!("workspace: {err}"));
                    return outcome;
                }
            };

            let end = match pipeline.execute_task(&task.id, &workspace).await {
                Ok(end) => end,
                Err(err) => {
                    outcome.error = Some(err.to_string());
                    outcome.final_status = refreshed_status(&store, &task.id).await;
                    return outcome;
                }
            };

            outcome.success = end.is_success();
            outcome.final_status = refreshed_status(&store, &task.id).await;

            if let PipelineEnd::Completed = end {
                // One merge at a time across the whole run.
                let _guard = merge_lock.lock().await;
                let started_at = Utc::now();
                match merger.merge_task(&task.id, &base_branch).await {
                    Ok(result) => {
                        let mut cleaned_up = false;
                        if result.success {
                            let removed = workspaces.remove_workspace(&task.id, true).await;
                            let branch_gone = merger.cleanup_branch(&task.id).await;
                            cleaned_up = removed.is_ok() && matches!(branch_gone, Ok(true));
                            if let Err(err) = removed {
                                warn!(task_id = %task.id, error = %err, "Workspace cleanup failed");
                            }
                        }
                        outcome.merge = Some(MergeReport {
                            merged: result.success,
                            message: result.message,
                            started_at,
                            finished_at: Utc::now(),
                            cleaned_up,
                        });
                    }
                    Err(err) => {
                        outcome.merge = Some(MergeReport {
                            merged: false,
                            message: err.to_string(),
                            started_at,
                            finished_at: Utc::now(),
                            cleaned_up: false,
                        });
                    }
                }
            }

            outcome
        }
    }
}

async fn refreshed_status(store: &Store, task_id: &str) -> String {
    match store.get_task(task_id, false).await {
        Ok(Some(task)) => task.status.as_str().to_string(),
        _ => TaskStatus::Todo.as_str().to_string(),
    }
}

fn sort_by_priority(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        a.priority
            .as_i64()
            .cmp(&b.priority.as_i64())
            .then(a.created_at.cmp(&b.created_at))
    });
}
