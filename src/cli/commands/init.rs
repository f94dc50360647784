//! `init` and `status` commands.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::application::Project;
use crate::cli::output::{output, CommandOutput};
use crate::domain::errors::DomainResult;
use crate::domain::models::RalphLoopStatus;

#[derive(Debug, Serialize)]
struct InitOutput {
    root: String,
    project_name: String,
    updated: bool,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        format!(
            "Initialized project '{}' at {}",
            self.project_name, self.root
        )
    }
}

pub async fn handle_init(path: Option<PathBuf>, update: bool, json: bool) -> DomainResult<()> {
    let root = match path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let project = Project::init(&root, update).await?;
    output(
        &InitOutput {
            root: project.root.display().to_string(),
            project_name: project.config.project_name.clone(),
            updated: update,
        },
        json,
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    project_name: String,
    specs_by_status: HashMap<String, usize>,
    tasks_by_status: HashMap<String, usize>,
    active_agents: usize,
    running_loops: usize,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Project: {}", self.project_name)];

        lines.push(format!("Specs: {}", summarize(&self.specs_by_status)));
        lines.push(format!("Tasks: {}", summarize(&self.tasks_by_status)));
        lines.push(format!("Active agents: {}", self.active_agents));
        lines.push(format!("Running ralph loops: {}", self.running_loops));
        lines.join("\n")
    }
}

fn summarize(counts: &HashMap<String, usize>) -> String {
    if counts.is_empty() {
        return "none".to_string();
    }
    let mut entries: Vec<_> = counts.iter().collect();
    entries.sort_by_key(|(status, _)| status.as_str().to_string());
    entries
        .into_iter()
        .map(|(status, n)| format!("{n} {status}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub async fn handle_status(json: bool) -> DomainResult<()> {
    let project = Project::load().await?;

    let mut specs_by_status: HashMap<String, usize> = HashMap::new();
    for spec in project.store.list_specs(None).await? {
        *specs_by_status
            .entry(spec.status.as_str().to_string())
            .or_default() += 1;
    }

    let mut tasks_by_status: HashMap<String, usize> = HashMap::new();
    for task in project.store.list_tasks(None, None).await? {
        *tasks_by_status
            .entry(task.status.as_str().to_string())
            .or_default() += 1;
    }

    let active_agents = project.store.list_active_agents().await?.len();
    let running_loops = project
        .store
        .list_ralph_loops(Some(RalphLoopStatus::Running))
        .await?
        .len();

    output(
        &StatusOutput {
            project_name: project.config.project_name.clone(),
            specs_by_status,
            tasks_by_status,
            active_agents,
            running_loops,
        },
        json,
    );
    Ok(())
}
