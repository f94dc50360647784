//! SQL for the Ralph-loop registry.

use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentRole, RalphLoop, RalphLoopStatus, VerificationRecord};

use super::spec_repository::parse_timestamp;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RalphRow {
    pub id: String,
    pub task_id: String,
    pub agent_type: String,
    pub iteration: i64,
    pub max_iterations: i64,
    pub status: String,
    pub verification_results: String,
    pub started_at: String,
    pub updated_at: String,
}

impl TryFrom<RalphRow> for RalphLoop {
    type Error = DomainError;

    fn try_from(row: RalphRow) -> DomainResult<RalphLoop> {
        let agent_type = AgentRole::from_str(&row.agent_type).ok_or_else(|| {
            DomainError::StoreCorruption(format!("ralph agent_type: {}", row.agent_type))
        })?;
        let status = RalphLoopStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::StoreCorruption(format!("ralph status: {}", row.status)))?;
        let verification_results: Vec<VerificationRecord> =
            serde_json::from_str(&row.verification_results)?;
        Ok(RalphLoop {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| DomainError::StoreCorruption(format!("ralph id: {e}")))?,
            task_id: row.task_id,
            agent_type,
            iteration: u32::try_from(row.iteration.max(0)).unwrap_or(0),
            max_iterations: u32::try_from(row.max_iterations.max(0)).unwrap_or(0),
            status,
            verification_results,
            started_at: parse_timestamp(&row.started_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

/// Register a fresh running loop.
///
/// Any loop still running for the same (task, role) pair is superseded:
/// it is marked cancelled before the new row is inserted, preserving the
/// one-running-loop invariant backed by the partial unique index.
pub(crate) async fn register(
    conn: &mut SqliteConnection,
    task_id: &str,
    agent_type: AgentRole,
    max_iterations: u32,
) -> DomainResult<RalphLoop> {
    sqlx::query(
        "UPDATE ralph_loops SET status = 'cancelled', updated_at = ?
         WHERE task_id = ? AND agent_type = ? AND status = 'running'",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(task_id)
    .bind(agent_type.as_str())
    .execute(&mut *conn)
    .await?;

    let lp = RalphLoop::new(task_id, agent_type, max_iterations);
    sqlx::query(
        "INSERT INTO ralph_loops (id, task_id, agent_type, iteration, max_iterations,
         status, verification_results, started_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(lp.id.to_string())
    .bind(&lp.task_id)
    .bind(lp.agent_type.as_str())
    .bind(i64::from(lp.iteration))
    .bind(i64::from(lp.max_iterations))
    .bind(lp.status.as_str())
    .bind(serde_json::to_string(&lp.verification_results)?)
    .bind(lp.started_at.to_rfc3339())
    .bind(lp.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(lp)
}

/// Bump the iteration counter and/or append a verification record to the
/// running loop for (task, role).
pub(crate) async fn update(
    conn: &mut SqliteConnection,
    task_id: &str,
    agent_type: AgentRole,
    iteration: Option<u32>,
    verification_result: Option<&VerificationRecord>,
) -> DomainResult<RalphLoop> {
    let mut lp = get_running(conn, task_id, agent_type)
        .await?
        .ok_or_else(|| DomainError::NotFound {
            kind: "RalphLoop",
            id: format!("{task_id}/{}", agent_type.as_str()),
        })?;

    if let Some(iteration) = iteration {
        lp.iteration = iteration;
    }
    if let Some(record) = verification_result {
        lp.verification_results.push(record.clone());
    }
    lp.updated_at = Utc::now();

    sqlx::query(
        "UPDATE ralph_loops SET iteration = ?, verification_results = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(i64::from(lp.iteration))
    .bind(serde_json::to_string(&lp.verification_results)?)
    .bind(lp.updated_at.to_rfc3339())
    .bind(lp.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(lp)
}

/// Transition the running loop for (task, role) to completed or failed.
pub(crate) async fn complete(
    conn: &mut SqliteConnection,
    task_id: &str,
    agent_type: AgentRole,
    success: bool,
) -> DomainResult<bool> {
    let status = if success {
        RalphLoopStatus::Completed
    } else {
        RalphLoopStatus::Failed
    };
    let result = sqlx::query(
        "UPDATE ralph_loops SET status = ?, updated_at = ?
         WHERE task_id = ? AND agent_type = ? AND status = 'running'",
    )
    .bind(status.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(task_id)
    .bind(agent_type.as_str())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Cancel running loop(s) for a task, optionally narrowed to one role.
pub(crate) async fn cancel(
    conn: &mut SqliteConnection,
    task_id: &str,
    agent_type: Option<AgentRole>,
) -> DomainResult<usize> {
    let result = if let Some(agent_type) = agent_type {
        sqlx::query(
            "UPDATE ralph_loops SET status = 'cancelled', updated_at = ?
             WHERE task_id = ? AND agent_type = ? AND status = 'running'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .bind(agent_type.as_str())
        .execute(conn)
        .await?
    } else {
        sqlx::query(
            "UPDATE ralph_loops SET status = 'cancelled', updated_at = ?
             WHERE task_id = ? AND status = 'running'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .execute(conn)
        .await?
    };
    Ok(result.rows_affected() as usize)
}

pub(crate) async fn get_running(
    conn: &mut SqliteConnection,
    task_id: &str,
    agent_type: AgentRole,
) -> DomainResult<Option<RalphLoop>> {
    let row: Option<RalphRow> = sqlx::query_as(
        "SELECT * FROM ralph_loops
         WHERE task_id = ? AND agent_type = ? AND status = 'running'",
    )
    .bind(task_id)
    .bind(agent_type.as_str())
    .fetch_optional(conn)
    .await?;
    row.map(RalphLoop::try_from).transpose()
}

/// Most recent loop for a task, optionally narrowed by role.
pub(crate) async fn get_latest(
    conn: &mut SqliteConnection,
    task_id: &str,
    agent_type: Option<AgentRole>,
) -> DomainResult<Option<RalphLoop>> {
    let row: Option<RalphRow> = if let Some(agent_type) = agent_type {
        sqlx::query_as(
            "SELECT * FROM ralph_loops WHERE task_id = ? AND agent_type = ?
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(task_id)
        .bind(agent_type.as_str())
        .fetch_optional(conn)
        .await?
    } else {
        sqlx::query_as(
            "SELECT * FROM ralph_loops WHERE task_id = ?
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(conn)
        .await?
    };
    row.map(RalphLoop::try_from).transpose()
}

pub(crate) async fn list(
    conn: &mut SqliteConnection,
    status: Option<RalphLoopStatus>,
) -> DomainResult<Vec<RalphLoop>> {
    let rows: Vec<RalphRow> = if let Some(status) = status {
        sqlx::query_as("SELECT * FROM ralph_loops WHERE status = ? ORDER BY started_at ASC")
            .bind(status.as_str())
            .fetch_all(conn)
            .await?
    } else {
        sqlx::query_as("SELECT * FROM ralph_loops ORDER BY started_at ASC")
            .fetch_all(conn)
            .await?
    };
    rows.into_iter().map(RalphLoop::try_from).collect()
}
