//! `execute`: run ready tasks through the agent pipeline.

use std::sync::Arc;

use serde::Serialize;

use crate::application::{
    ExecutionFilter, ExecutionSummary, Pipeline, PipelineConfig, Project, Scheduler,
};
use crate::cli::output::{output, CommandOutput};
use crate::domain::errors::{DomainError, DomainResult};
use crate::infrastructure::agent::CliAgentRunner;
use crate::services::{MergeOrchestrator, WorkspaceManager};

#[derive(Debug, Serialize)]
struct ExecuteOutput {
    #[serde(flatten)]
    summary: ExecutionSummary,
}

impl CommandOutput for ExecuteOutput {
    fn to_human(&self) -> String {
        if self.summary.no_work() {
            return "No tasks ready to execute".to_string();
        }
        let mut lines = Vec::new();
        for outcome in &self.summary.outcomes {
            let mark = if outcome.success {
                console::style("✓").green().to_string()
            } else {
                console::style("✗").red().to_string()
            };
            let mut line = format!("[{mark}] {}: {}", outcome.task_id, outcome.final_status);
            if let Some(ref merge) = outcome.merge {
                if merge.merged {
                    line.push_str(" (merged)");
                } else {
                    line.push_str(&format!(" (merge failed: {})", merge.message));
                }
            }
            if let Some(ref error) = outcome.error {
                line.push_str(&format!(" — {error}"));
            }
            lines.push(line);
        }
        lines.push(format!(
            "\nCompleted: {}/{} tasks successful",
            self.summary.successful, self.summary.total
        ));
        lines.join("\n")
    }
}

/// Returns whether every executed task succeeded; the caller maps that
/// to the process exit code.
pub async fn handle_execute(
    spec: Option<String>,
    task: Option<String>,
    max_parallel: usize,
    json: bool,
) -> DomainResult<bool> {
    let project = Project::load().await?;

    let filter = match (task, spec) {
        (Some(_), Some(_)) => {
            return Err(DomainError::InvalidArgument(
                "--task and --spec are mutually exclusive".to_string(),
            ))
        }
        (Some(task_id), None) => ExecutionFilter::Single(task_id),
        (None, Some(spec_id)) => ExecutionFilter::BySpec(spec_id),
        (None, None) => ExecutionFilter::AllReady,
    };

    let invoker = Arc::new(CliAgentRunner::new(project.config.agent_command.clone()));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&project.store),
        invoker.clone(),
        project.root.clone(),
        PipelineConfig {
            agent_timeout: project.config.agent_timeout(),
            agent_models: project.config.agent_models.clone(),
            ..Default::default()
        },
    ));
    let workspaces = Arc::new(WorkspaceManager::new(project.root.clone()));
    let merger = Arc::new(MergeOrchestrator::new(
        project.root.clone(),
        invoker,
        project.config.agent_timeout(),
    ));

    let scheduler = Scheduler::new(
        Arc::clone(&project.store),
        pipeline,
        workspaces,
        merger,
        project.config.base_branch.clone(),
    );

    let summary = scheduler.execute(filter, max_parallel).await?;
    let all_succeeded = summary.all_succeeded();
    output(&ExecuteOutput { summary }, json);
    Ok(all_succeeded)
}
