//! Workspace and merge commands.

use std::sync::Arc;

use serde::Serialize;

use crate::application::Project;
use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::errors::{DomainError, DomainResult};
use crate::infrastructure::agent::CliAgentRunner;
use crate::services::{MergeOrchestrator, WorkspaceInfo, WorkspaceManager};

#[derive(Debug, Serialize)]
struct WorkspaceOutput {
    task_id: String,
    path: String,
    branch: String,
}

impl CommandOutput for WorkspaceOutput {
    fn to_human(&self) -> String {
        format!("Workspace for {} at {} ({})", self.task_id, self.path, self.branch)
    }
}

pub async fn handle_create(
    task_id: String,
    base: Option<String>,
    json: bool,
) -> DomainResult<()> {
    let project = Project::load().await?;

    if project.store.get_task(&task_id, false).await?.is_none() {
        return Err(DomainError::task_not_found(&task_id));
    }

    let base = base.unwrap_or_else(|| project.config.base_branch.clone());
    let manager = WorkspaceManager::new(project.root.clone());
    let path = manager.create_workspace(&task_id, &base).await?;

    output(
        &WorkspaceOutput {
            branch: crate::services::task_branch(&task_id),
            task_id,
            path: path.display().to_string(),
        },
        json,
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct RemovedOutput {
    task_id: String,
    removed: bool,
}

impl CommandOutput for RemovedOutput {
    fn to_human(&self) -> String {
        format!("Workspace for {} removed", self.task_id)
    }
}

pub async fn handle_remove(task_id: String, force: bool, json: bool) -> DomainResult<()> {
    let project = Project::load().await?;
    let manager = WorkspaceManager::new(project.root.clone());
    manager.remove_workspace(&task_id, force).await?;
    output(
        &RemovedOutput {
            task_id,
            removed: true,
        },
        json,
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct WorkspaceListOutput {
    workspaces: Vec<WorkspaceInfo>,
    total: usize,
}

impl CommandOutput for WorkspaceListOutput {
    fn to_human(&self) -> String {
        if self.workspaces.is_empty() {
            return "No workspaces found.".to_string();
        }
        let mut table = list_table(&["path", "branch", "commit"]);
        for ws in &self.workspaces {
            table.add_row(vec![
                ws.path.clone(),
                ws.branch.clone().unwrap_or_else(|| "(detached)".to_string()),
                ws.commit
                    .as_deref()
                    .map_or_else(String::new, |c| c.chars().take(8).collect()),
            ]);
        }
        format!("{} workspace(s):\n{table}", self.total)
    }
}

pub async fn handle_list(json: bool) -> DomainResult<()> {
    let project = Project::load().await?;
    let manager = WorkspaceManager::new(project.root.clone());
    let workspaces = manager.list_workspaces().await?;
    output(
        &WorkspaceListOutput {
            total: workspaces.len(),
            workspaces,
        },
        json,
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct CommitOutput {
    task_id: String,
    commit: String,
}

impl CommandOutput for CommitOutput {
    fn to_human(&self) -> String {
        format!("Committed {} in workspace for {}", self.commit, self.task_id)
    }
}

pub async fn handle_commit(task_id: String, message: String, json: bool) -> DomainResult<()> {
    let project = Project::load().await?;
    let manager = WorkspaceManager::new(project.root.clone());
    let commit = manager.commit_changes(&task_id, &message).await?;
    output(&CommitOutput { task_id, commit }, json);
    Ok(())
}

#[derive(Debug, Serialize)]
struct MergeOutput {
    task_id: String,
    merged: bool,
    message: String,
    cleaned_up: bool,
}

impl CommandOutput for MergeOutput {
    fn to_human(&self) -> String {
        let mut line = if self.merged {
            format!("✓ {}", self.message)
        } else {
            format!("✗ {}", self.message)
        };
        if self.cleaned_up {
            line.push_str(" (workspace and branch removed)");
        }
        line
    }
}

pub async fn handle_merge(
    task_id: String,
    target: Option<String>,
    cleanup: bool,
    json: bool,
) -> DomainResult<()> {
    let project = Project::load().await?;
    let target = target.unwrap_or_else(|| project.config.base_branch.clone());

    let invoker = Arc::new(CliAgentRunner::new(project.config.agent_command.clone()));
    let merger = MergeOrchestrator::new(project.root.clone(), invoker, project.config.agent_timeout());

    let result = merger.merge_task(&task_id, &target).await?;
    if !result.success {
        return Err(DomainError::MergeFailed(result.message));
    }

    let mut cleaned_up = false;
    if cleanup {
        let manager = WorkspaceManager::new(project.root.clone());
        if manager.workspace_path(&task_id).exists() {
            manager.remove_workspace(&task_id, true).await?;
        }
        cleaned_up = merger.cleanup_branch(&task_id).await?;
    }

    output(
        &MergeOutput {
            task_id,
            merged: true,
            message: result.message,
            cleaned_up,
        },
        json,
    );
    Ok(())
}
