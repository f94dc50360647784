//! Ralph loop commands.

use serde::Serialize;

use crate::application::Project;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentRole, RalphLoop, RalphLoopStatus};

#[derive(Debug, Serialize)]
struct RalphOutput {
    task_id: String,
    agent_type: String,
    status: String,
    iteration: u32,
    max_iterations: u32,
    progress_percent: f64,
    elapsed_seconds: i64,
    last_reason: Option<String>,
}

impl From<&RalphLoop> for RalphOutput {
    fn from(lp: &RalphLoop) -> Self {
        Self {
            task_id: lp.task_id.clone(),
            agent_type: lp.agent_type.as_str().to_string(),
            status: lp.status.as_str().to_string(),
            iteration: lp.iteration,
            max_iterations: lp.max_iterations,
            progress_percent: lp.progress_percent(),
            elapsed_seconds: lp.elapsed_seconds(),
            last_reason: lp.verification_results.last().map(|r| r.reason.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
struct RalphListOutput {
    loops: Vec<RalphOutput>,
    total: usize,
}

impl CommandOutput for RalphListOutput {
    fn to_human(&self) -> String {
        if self.loops.is_empty() {
            return "No ralph loops found.".to_string();
        }
        let mut table = list_table(&["task", "type", "status", "progress", "last result"]);
        for lp in &self.loops {
            table.add_row(vec![
                lp.task_id.clone(),
                lp.agent_type.clone(),
                lp.status.clone(),
                format!("{}/{} ({:.0}%)", lp.iteration, lp.max_iterations, lp.progress_percent),
                lp.last_reason
                    .as_deref()
                    .map_or_else(|| "-".to_string(), |r| truncate(r, 40)),
            ]);
        }
        format!("{} loop(s):\n{table}", self.total)
    }
}

pub async fn handle_status(
    task_id: Option<String>,
    status: Option<String>,
    json: bool,
) -> DomainResult<()> {
    let project = Project::load().await?;

    let loops = if let Some(ref task_id) = task_id {
        project
            .store
            .get_ralph_loop(task_id, None)
            .await?
            .map(|lp| vec![lp])
            .unwrap_or_default()
    } else {
        let status = status
            .as_deref()
            .map(|s| {
                RalphLoopStatus::from_str(s).ok_or_else(|| {
                    DomainError::InvalidStatus(format!("unknown loop status: {s}"))
                })
            })
            .transpose()?;
        project.store.list_ralph_loops(status).await?
    };

    output(
        &RalphListOutput {
            total: loops.len(),
            loops: loops.iter().map(RalphOutput::from).collect(),
        },
        json,
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct CancelOutput {
    cancelled: usize,
}

impl CommandOutput for CancelOutput {
    fn to_human(&self) -> String {
        match self.cancelled {
            0 => "No running loops matched".to_string(),
            n => format!("Cancelled {n} loop(s)"),
        }
    }
}

pub async fn handle_cancel(
    task_id: String,
    agent_type: Option<String>,
    json: bool,
) -> DomainResult<()> {
    let project = Project::load().await?;

    let role = agent_type
        .as_deref()
        .map(|s| {
            AgentRole::from_str(s)
                .ok_or_else(|| DomainError::InvalidArgument(format!("unknown agent type: {s}")))
        })
        .transpose()?;

    let cancelled = project.store.cancel_ralph_loop(&task_id, role).await?;
    output(&CancelOutput { cancelled }, json);
    Ok(())
}
