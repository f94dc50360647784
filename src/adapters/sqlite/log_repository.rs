//! SQL for the append-only execution log.

use chrono::Utc;
use sqlx::SqliteConnection;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{truncate_output, AgentRole, ExecutionLog};

use super::spec_repository::parse_timestamp;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LogRow {
    pub id: i64,
    pub task_id: String,
    pub agent_type: String,
    pub action: String,
    pub output: String,
    pub success: i64,
    pub duration_ms: i64,
    pub created_at: String,
}

impl TryFrom<LogRow> for ExecutionLog {
    type Error = DomainError;

    fn try_from(row: LogRow) -> DomainResult<ExecutionLog> {
        let agent_type = AgentRole::from_str(&row.agent_type).ok_or_else(|| {
            DomainError::StoreCorruption(format!("log agent_type: {}", row.agent_type))
        })?;
        Ok(ExecutionLog {
            id: row.id,
            task_id: row.task_id,
            agent_type,
            action: row.action,
            output: row.output,
            success: row.success != 0,
            duration_ms: row.duration_ms,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    task_id: &str,
    agent_type: AgentRole,
    action: &str,
    output: &str,
    success: bool,
    duration_ms: i64,
) -> DomainResult<i64> {
    let result = sqlx::query(
        "INSERT INTO execution_logs (task_id, agent_type, action, output, success,
         duration_ms, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task_id)
    .bind(agent_type.as_str())
    .bind(action)
    .bind(truncate_output(output))
    .bind(i64::from(success))
    .bind(duration_ms)
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub(crate) async fn list_for_task(
    conn: &mut SqliteConnection,
    task_id: &str,
) -> DomainResult<Vec<ExecutionLog>> {
    let rows: Vec<LogRow> = sqlx::query_as(
        "SELECT * FROM execution_logs WHERE task_id = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(task_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(ExecutionLog::try_from).collect()
}
