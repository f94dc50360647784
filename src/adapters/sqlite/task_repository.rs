//! SQL for tasks, dependencies, and the normalized completion-spec
//! side tables.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentRole, CompletionCriteria, Task, TaskCompletionSpec, TaskPriority, TaskStatus,
};

use super::spec_repository::parse_timestamp;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub id: String,
    pub spec_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: i64,
    pub assignee: Option<String>,
    pub worktree: Option<String>,
    pub iteration: i64,
    pub created_at: String,
    pub updated_at: String,
    pub metadata: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> DomainResult<Task> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::StoreCorruption(format!("task status: {}", row.status)))?;
        let priority = TaskPriority::from_i64(row.priority).ok_or_else(|| {
            DomainError::StoreCorruption(format!("task priority: {}", row.priority))
        })?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&row.metadata)?;
        Ok(Task {
            id: row.id,
            spec_id: row.spec_id,
            title: row.title,
            description: row.description,
            status,
            priority,
            dependencies: Vec::new(),
            assignee: row.assignee,
            worktree: row.worktree,
            iteration: u32::try_from(row.iteration.max(0)).unwrap_or(0),
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            metadata,
            completion_spec: None,
        })
    }
}

pub(crate) async fn insert(conn: &mut SqliteConnection, task: &Task) -> DomainResult<()> {
    sqlx::query(
        "INSERT INTO tasks (id, spec_id, title, description, status, priority, assignee,
         worktree, iteration, created_at, updated_at, metadata)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&task.id)
    .bind(&task.spec_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status.as_str())
    .bind(task.priority.as_i64())
    .bind(&task.assignee)
    .bind(&task.worktree)
    .bind(i64::from(task.iteration))
    .bind(task.created_at.to_rfc3339())
    .bind(task.updated_at.to_rfc3339())
    .bind(serde_json::to_string(&task.metadata)?)
    .execute(&mut *conn)
    .await?;

    replace_dependencies(conn, &task.id, &task.dependencies).await?;

    if let Some(ref completion) = task.completion_spec {
        save_completion_spec(conn, &task.id, completion).await?;
    }

    Ok(())
}

pub(crate) async fn update(conn: &mut SqliteConnection, task: &Task) -> DomainResult<()> {
    let result = sqlx::query(
        "UPDATE tasks SET spec_id = ?, title = ?, description = ?, status = ?, priority = ?,
         assignee = ?, worktree = ?, iteration = ?, updated_at = ?, metadata = ?
         WHERE id = ?",
    )
    .bind(&task.spec_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status.as_str())
    .bind(task.priority.as_i64())
    .bind(&task.assignee)
    .bind(&task.worktree)
    .bind(i64::from(task.iteration))
    .bind(task.updated_at.to_rfc3339())
    .bind(serde_json::to_string(&task.metadata)?)
    .bind(&task.id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DomainError::task_not_found(&task.id));
    }

    replace_dependencies(conn, &task.id, &task.dependencies).await?;

    if let Some(ref completion) = task.completion_spec {
        save_completion_spec(conn, &task.id, completion).await?;
    }

    Ok(())
}

pub(crate) async fn delete(conn: &mut SqliteConnection, task_id: &str) -> DomainResult<()> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(task_id)
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DomainError::task_not_found(task_id));
    }
    Ok(())
}

pub(crate) async fn get(
    conn: &mut SqliteConnection,
    task_id: &str,
    load_completion: bool,
) -> DomainResult<Option<Task>> {
    let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let mut task = Task::try_from(row)?;
            load_dependencies(conn, &mut task).await?;
            if load_completion {
                task.completion_spec = load_completion_spec(conn, &task.id).await?;
            }
            Ok(Some(task))
        }
        None => Ok(None),
    }
}

/// List tasks ordered by priority then creation time.
pub(crate) async fn list(
    conn: &mut SqliteConnection,
    spec_id: Option<&str>,
    status: Option<TaskStatus>,
) -> DomainResult<Vec<Task>> {
    let mut query = String::from("SELECT * FROM tasks WHERE 1=1");
    let mut bindings: Vec<String> = Vec::new();

    if let Some(spec_id) = spec_id {
        query.push_str(" AND spec_id = ?");
        bindings.push(spec_id.to_string());
    }
    if let Some(status) = status {
        query.push_str(" AND status = ?");
        bindings.push(status.as_str().to_string());
    }
    query.push_str(" ORDER BY priority ASC, created_at ASC");

    let mut q = sqlx::query_as::<_, TaskRow>(&query);
    for binding in &bindings {
        q = q.bind(binding);
    }

    let rows: Vec<TaskRow> = q.fetch_all(&mut *conn).await?;
    rows_to_tasks(conn, rows).await
}

/// All todo tasks whose declared dependencies are all done.
///
/// A dangling dependency (id with no task row) keeps its dependent
/// blocked rather than silently releasing it.
pub(crate) async fn ready(
    conn: &mut SqliteConnection,
    spec_id: Option<&str>,
) -> DomainResult<Vec<Task>> {
    let rows: Vec<TaskRow> = sqlx::query_as(
        "SELECT t.* FROM tasks t
         WHERE t.status = 'todo'
           AND (?1 IS NULL OR t.spec_id = ?1)
           AND NOT EXISTS (
               SELECT 1 FROM task_dependencies d
               LEFT JOIN tasks dep ON dep.id = d.depends_on
               WHERE d.task_id = t.id AND (dep.id IS NULL OR dep.status != 'done')
           )
         ORDER BY t.priority ASC, t.created_at ASC",
    )
    .bind(spec_id)
    .fetch_all(&mut *conn)
    .await?;
    rows_to_tasks(conn, rows).await
}

pub(crate) async fn updated_since(
    conn: &mut SqliteConnection,
    spec_id: &str,
    since: DateTime<Utc>,
) -> DomainResult<Vec<Task>> {
    let rows: Vec<TaskRow> = sqlx::query_as(
        "SELECT * FROM tasks WHERE spec_id = ? AND updated_at >= ?
         ORDER BY updated_at ASC",
    )
    .bind(spec_id)
    .bind(since.to_rfc3339())
    .fetch_all(&mut *conn)
    .await?;
    rows_to_tasks(conn, rows).await
}

async fn rows_to_tasks(
    conn: &mut SqliteConnection,
    rows: Vec<TaskRow>,
) -> DomainResult<Vec<Task>> {
    let mut tasks = Vec::with_capacity(rows.len());
    for row in rows {
        let mut task = Task::try_from(row)?;
        load_dependencies(conn, &mut task).await?;
        tasks.push(task);
    }
    Ok(tasks)
}

async fn load_dependencies(conn: &mut SqliteConnection, task: &mut Task) -> DomainResult<()> {
    let deps: Vec<(String,)> = sqlx::query_as(
        "SELECT depends_on FROM task_dependencies WHERE task_id = ? ORDER BY position ASC",
    )
    .bind(&task.id)
    .fetch_all(conn)
    .await?;
    task.dependencies = deps.into_iter().map(|(d,)| d).collect();
    Ok(())
}

async fn replace_dependencies(
    conn: &mut SqliteConnection,
    task_id: &str,
    dependencies: &[String],
) -> DomainResult<()> {
    sqlx::query("DELETE FROM task_dependencies WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut *conn)
        .await?;

    for (position, dep) in dependencies.iter().enumerate() {
        sqlx::query(
            "INSERT INTO task_dependencies (task_id, depends_on, position) VALUES (?, ?, ?)",
        )
        .bind(task_id)
        .bind(dep)
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub(crate) async fn save_completion_spec(
    conn: &mut SqliteConnection,
    task_id: &str,
    spec: &TaskCompletionSpec,
) -> DomainResult<()> {
    sqlx::query(
        "INSERT INTO task_completion_specs (task_id, outcome, acceptance_criteria)
         VALUES (?, ?, ?)
         ON CONFLICT(task_id) DO UPDATE SET outcome = excluded.outcome,
             acceptance_criteria = excluded.acceptance_criteria",
    )
    .bind(task_id)
    .bind(&spec.outcome)
    .bind(serde_json::to_string(&spec.acceptance_criteria)?)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM task_agent_criteria WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut *conn)
        .await?;

    for (role, criteria) in spec.all_criteria() {
        let (method, config) = criteria.to_parts();
        sqlx::query(
            "INSERT INTO task_agent_criteria
             (task_id, agent_type, promise, description, verification_method,
              verification_config, max_iterations)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(role.as_str())
        .bind(&criteria.promise)
        .bind(&criteria.description)
        .bind(&method)
        .bind(config.map(|c| c.to_string()))
        .bind(criteria.max_iterations.map(i64::from))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub(crate) async fn load_completion_spec(
    conn: &mut SqliteConnection,
    task_id: &str,
) -> DomainResult<Option<TaskCompletionSpec>> {
    let row: Option<(String, String)> = sqlx::query_as(
        "SELECT outcome, acceptance_criteria FROM task_completion_specs WHERE task_id = ?",
    )
    .bind(task_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((outcome, acceptance_json)) = row else {
        return Ok(None);
    };

    let acceptance_criteria: Vec<String> = serde_json::from_str(&acceptance_json)?;
    let mut spec = TaskCompletionSpec {
        outcome,
        acceptance_criteria,
        ..Default::default()
    };

    let criteria_rows: Vec<(String, String, String, String, Option<String>, Option<i64>)> =
        sqlx::query_as(
            "SELECT agent_type, promise, description, verification_method,
                    verification_config, max_iterations
             FROM task_agent_criteria WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_all(&mut *conn)
        .await?;

    for (agent_type, promise, description, method, config, max_iterations) in criteria_rows {
        let role = AgentRole::from_str(&agent_type).ok_or_else(|| {
            DomainError::StoreCorruption(format!("criteria agent_type: {agent_type}"))
        })?;
        let config = config
            .map(|c| serde_json::from_str(&c))
            .transpose()
            .map_err(|e| DomainError::StoreCorruption(format!("criteria config: {e}")))?;
        let criteria = CompletionCriteria::from_parts(
            promise,
            description,
            &method,
            config,
            max_iterations.and_then(|n| u32::try_from(n).ok()),
        )
        .map_err(DomainError::StoreCorruption)?;
        spec.set_criteria(role, criteria);
    }

    Ok(Some(spec))
}
