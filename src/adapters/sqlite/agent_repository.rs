//! SQL for the active-agent slot registry.

use sqlx::SqliteConnection;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ActiveAgent, AgentRole};

use super::spec_repository::parse_timestamp;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AgentRow {
    pub id: i64,
    pub task_id: String,
    pub agent_type: String,
    pub slot: i64,
    pub pid: Option<i64>,
    pub worktree: Option<String>,
    pub started_at: String,
}

impl TryFrom<AgentRow> for ActiveAgent {
    type Error = DomainError;

    fn try_from(row: AgentRow) -> DomainResult<ActiveAgent> {
        let agent_type = AgentRole::from_str(&row.agent_type).ok_or_else(|| {
            DomainError::StoreCorruption(format!("agent_type: {}", row.agent_type))
        })?;
        Ok(ActiveAgent {
            id: row.id,
            task_id: row.task_id,
            agent_type,
            slot: u32::try_from(row.slot)
                .map_err(|_| DomainError::StoreCorruption(format!("slot: {}", row.slot)))?,
            pid: row.pid.and_then(|p| u32::try_from(p).ok()),
            worktree: row.worktree,
            started_at: parse_timestamp(&row.started_at)?,
        })
    }
}

/// Register an agent in the lowest free slot.
///
/// Re-registering a task that already holds a slot is refused; the
/// unique task_id constraint backs the at-most-one-agent-per-task
/// invariant.
pub(crate) async fn register(
    conn: &mut SqliteConnection,
    task_id: &str,
    agent_type: AgentRole,
    pid: Option<u32>,
    worktree: Option<&str>,
    max_slots: u32,
) -> DomainResult<ActiveAgent> {
    let used: Vec<(i64,)> = sqlx::query_as("SELECT slot FROM active_agents ORDER BY slot ASC")
        .fetch_all(&mut *conn)
        .await?;
    let used: Vec<u32> = used
        .into_iter()
        .filter_map(|(s,)| u32::try_from(s).ok())
        .collect();

    let slot = (1..=max_slots)
        .find(|candidate| !used.contains(candidate))
        .ok_or(DomainError::SlotsExhausted(max_slots))?;

    let started_at = chrono::Utc::now();
    let result = sqlx::query(
        "INSERT INTO active_agents (task_id, agent_type, slot, pid, worktree, started_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(task_id)
    .bind(agent_type.as_str())
    .bind(i64::from(slot))
    .bind(pid.map(i64::from))
    .bind(worktree)
    .bind(started_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(ActiveAgent {
        id: result.last_insert_rowid(),
        task_id: task_id.to_string(),
        agent_type,
        slot,
        pid,
        worktree: worktree.map(String::from),
        started_at,
    })
}

pub(crate) async fn deregister_by_task(
    conn: &mut SqliteConnection,
    task_id: &str,
) -> DomainResult<bool> {
    let result = sqlx::query("DELETE FROM active_agents WHERE task_id = ?")
        .bind(task_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn deregister_by_slot(
    conn: &mut SqliteConnection,
    slot: u32,
) -> DomainResult<bool> {
    let result = sqlx::query("DELETE FROM active_agents WHERE slot = ?")
        .bind(i64::from(slot))
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list(conn: &mut SqliteConnection) -> DomainResult<Vec<ActiveAgent>> {
    let rows: Vec<AgentRow> = sqlx::query_as("SELECT * FROM active_agents ORDER BY slot ASC")
        .fetch_all(conn)
        .await?;
    rows.into_iter().map(ActiveAgent::try_from).collect()
}

pub(crate) async fn get_by_task(
    conn: &mut SqliteConnection,
    task_id: &str,
) -> DomainResult<Option<ActiveAgent>> {
    let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM active_agents WHERE task_id = ?")
        .bind(task_id)
        .fetch_optional(conn)
        .await?;
    row.map(ActiveAgent::try_from).transpose()
}

/// Remove rows whose recorded pid no longer maps to a live process.
/// Rows without a pid are never cleaned.
pub(crate) async fn cleanup_stale(
    conn: &mut SqliteConnection,
    is_alive: &dyn Fn(u32) -> bool,
) -> DomainResult<usize> {
    let rows: Vec<(i64, Option<i64>)> = sqlx::query_as("SELECT id, pid FROM active_agents")
        .fetch_all(&mut *conn)
        .await?;

    let mut removed = 0;
    for (id, pid) in rows {
        let Some(pid) = pid.and_then(|p| u32::try_from(p).ok()) else {
            continue;
        };
        if !is_alive(pid) {
            sqlx::query("DELETE FROM active_agents WHERE id = ?")
                .bind(id)
                .execute(&mut *conn)
                .await?;
            removed += 1;
        }
    }
    Ok(removed)
}
