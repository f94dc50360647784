//! Agent registry commands.

use serde::Serialize;

use crate::application::Project;
use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ActiveAgent, AgentRole};

#[derive(Debug, Serialize)]
struct AgentOutput {
    slot: u32,
    task_id: String,
    agent_type: String,
    pid: Option<u32>,
    worktree: Option<String>,
    started_at: String,
}

impl From<&ActiveAgent> for AgentOutput {
    fn from(agent: &ActiveAgent) -> Self {
        Self {
            slot: agent.slot,
            task_id: agent.task_id.clone(),
            agent_type: agent.agent_type.as_str().to_string(),
            pid: agent.pid,
            worktree: agent.worktree.clone(),
            started_at: agent.started_at.to_rfc3339(),
        }
    }
}

impl CommandOutput for AgentOutput {
    fn to_human(&self) -> String {
        format!(
            "Agent registered: slot {} for task {} ({})",
            self.slot, self.task_id, self.agent_type
        )
    }
}

fn parse_role(s: &str) -> DomainResult<AgentRole> {
    AgentRole::from_str(s)
        .ok_or_else(|| DomainError::InvalidArgument(format!("unknown agent type: {s}")))
}

pub async fn handle_start(
    task_id: String,
    agent_type: String,
    worktree: Option<String>,
    pid: Option<u32>,
    json: bool,
) -> DomainResult<()> {
    let project = Project::load().await?;
    let role = parse_role(&agent_type)?;

    if project.store.get_task(&task_id, false).await?.is_none() {
        return Err(DomainError::task_not_found(&task_id));
    }

    let agent = project
        .store
        .register_agent(&task_id, role, pid, worktree.as_deref())
        .await?;
    output(&AgentOutput::from(&agent), json);
    Ok(())
}

#[derive(Debug, Serialize)]
struct StopOutput {
    stopped: bool,
}

impl CommandOutput for StopOutput {
    fn to_human(&self) -> String {
        if self.stopped {
            "Agent deregistered".to_string()
        } else {
            "No matching agent found".to_string()
        }
    }
}

pub async fn handle_stop(
    task: Option<String>,
    slot: Option<u32>,
    json: bool,
) -> DomainResult<()> {
    let project = Project::load().await?;

    let stopped = match (task, slot) {
        (Some(task_id), None) => project.store.deregister_agent_by_task(&task_id).await?,
        (None, Some(slot)) => project.store.deregister_agent_by_slot(slot).await?,
        _ => {
            return Err(DomainError::InvalidArgument(
                "exactly one of --task or --slot is required".to_string(),
            ))
        }
    };

    output(&StopOutput { stopped }, json);
    Ok(())
}

#[derive(Debug, Serialize)]
struct AgentListOutput {
    agents: Vec<AgentOutput>,
    total: usize,
    stale_removed: usize,
}

impl CommandOutput for AgentListOutput {
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if self.stale_removed > 0 {
            lines.push(format!("Removed {} stale agent(s)", self.stale_removed));
        }
        if self.agents.is_empty() {
            lines.push("No active agents.".to_string());
            return lines.join("\n");
        }
        let mut table = list_table(&["slot", "task", "type", "pid", "started"]);
        for agent in &self.agents {
            table.add_row(vec![
                agent.slot.to_string(),
                agent.task_id.clone(),
                agent.agent_type.clone(),
                agent.pid.map_or_else(|| "-".to_string(), |p| p.to_string()),
                agent.started_at.clone(),
            ]);
        }
        lines.push(format!("{} active agent(s):\n{table}", self.total));
        lines.join("\n")
    }
}

pub async fn handle_list(json: bool) -> DomainResult<()> {
    let project = Project::load().await?;

    // Drop registrations whose process has exited before reporting.
    let stale_removed = project.store.cleanup_stale_agents().await?;
    let agents = project.store.list_active_agents().await?;

    output(
        &AgentListOutput {
            total: agents.len(),
            agents: agents.iter().map(AgentOutput::from).collect(),
            stale_removed,
        },
        json,
    );
    Ok(())
}
