//! SpecForge CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use specforge::cli::commands::{agent, execute, init, ralph, spec, sync, task, worktree};
use specforge::cli::output::fail;
use specforge::cli::{Cli, Commands};
use specforge::domain::errors::DomainResult;
use specforge::infrastructure::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_dir = std::env::var_os(logging::LOG_DIR_ENV).map(std::path::PathBuf::from);
    let _log_guard = logging::init(log_dir.as_deref()).ok().flatten();

    let json = cli.json;
    match dispatch(cli.command, json).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            fail(&err, json);
            ExitCode::FAILURE
        }
    }
}

/// Run one command. `Ok(false)` is a quiet failure whose diagnostics
/// were already printed (e.g. a partially failed execution run).
async fn dispatch(command: Commands, json: bool) -> DomainResult<bool> {
    match command {
        Commands::Init { path, update } => init::handle_init(path, update, json).await?,
        Commands::Status => init::handle_status(json).await?,

        Commands::SpecCreate {
            id,
            title,
            source_type,
            status,
        } => spec::handle_create(id, title, source_type, status, json).await?,
        Commands::SpecUpdate { id, status, title } => {
            spec::handle_update(id, status, title, json).await?;
        }
        Commands::SpecGet { id } => spec::handle_get(id, json).await?,
        Commands::ListSpecs { status } => spec::handle_list(status, json).await?,

        Commands::TaskCreate(args) => task::handle_create(args, json).await?,
        Commands::TaskFollowup(args) => task::handle_followup(args, json).await?,
        Commands::TaskUpdate { id, status } => task::handle_update(id, status, json).await?,
        Commands::ListTasks { spec, status } => task::handle_list(spec, status, json).await?,

        Commands::Execute {
            spec,
            task,
            max_parallel,
        } => {
            return execute::handle_execute(spec, task, max_parallel, json).await;
        }

        Commands::AgentStart {
            task_id,
            agent_type,
            worktree,
            pid,
        } => agent::handle_start(task_id, agent_type, worktree, pid, json).await?,
        Commands::AgentStop { task, slot } => agent::handle_stop(task, slot, json).await?,
        Commands::ListAgents => agent::handle_list(json).await?,

        Commands::RalphStatus { task_id, status } => {
            ralph::handle_status(task_id, status, json).await?;
        }
        Commands::RalphCancel {
            task_id,
            agent_type,
        } => ralph::handle_cancel(task_id, agent_type, json).await?,

        Commands::SyncExport => sync::handle_export(json).await?,
        Commands::SyncImport => sync::handle_import(json).await?,
        Commands::SyncCompact => sync::handle_compact(json).await?,
        Commands::SyncStatus => sync::handle_status(json).await?,

        Commands::WorktreeCreate { task_id, base } => {
            worktree::handle_create(task_id, base, json).await?;
        }
        Commands::WorktreeRemove { task_id, force } => {
            worktree::handle_remove(task_id, force, json).await?;
        }
        Commands::WorktreeList => worktree::handle_list(json).await?,
        Commands::WorktreeCommit { task_id, message } => {
            worktree::handle_commit(task_id, message, json).await?;
        }
        Commands::MergeTask {
            task_id,
            target,
            cleanup,
        } => worktree::handle_merge(task_id, target, cleanup, json).await?,
    }
    Ok(true)
}
