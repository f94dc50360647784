//! SQL for the specs table.
//!
//! Functions take `&mut SqliteConnection` so the store can compose them
//! inside a single transaction with the change-log append.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{SourceType, Spec, SpecStatus};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SpecRow {
    pub id: String,
    pub title: String,
    pub status: String,
    pub source_type: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub metadata: String,
}

impl TryFrom<SpecRow> for Spec {
    type Error = DomainError;

    fn try_from(row: SpecRow) -> DomainResult<Spec> {
        let status = SpecStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::StoreCorruption(format!("spec status: {}", row.status)))?;
        let source_type = match row.source_type.as_deref() {
            None => None,
            Some(s) => Some(SourceType::from_str(s).ok_or_else(|| {
                DomainError::StoreCorruption(format!("spec source_type: {s}"))
            })?),
        };
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&row.metadata)?;
        Ok(Spec {
            id: row.id,
            title: row.title,
            status,
            source_type,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            metadata,
        })
    }
}

pub(crate) fn parse_timestamp(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DomainError::StoreCorruption(format!("timestamp {s}: {e}")))
}

pub(crate) async fn insert(conn: &mut SqliteConnection, spec: &Spec) -> DomainResult<()> {
    sqlx::query(
        "INSERT INTO specs (id, title, status, source_type, created_at, updated_at, metadata)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&spec.id)
    .bind(&spec.title)
    .bind(spec.status.as_str())
    .bind(spec.source_type.map(|s| s.as_str()))
    .bind(spec.created_at.to_rfc3339())
    .bind(spec.updated_at.to_rfc3339())
    .bind(serde_json::to_string(&spec.metadata)?)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn update(conn: &mut SqliteConnection, spec: &Spec) -> DomainResult<()> {
    let result = sqlx::query(
        "UPDATE specs SET title = ?, status = ?, source_type = ?, updated_at = ?, metadata = ?
         WHERE id = ?",
    )
    .bind(&spec.title)
    .bind(spec.status.as_str())
    .bind(spec.source_type.map(|s| s.as_str()))
    .bind(spec.updated_at.to_rfc3339())
    .bind(serde_json::to_string(&spec.metadata)?)
    .bind(&spec.id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DomainError::spec_not_found(&spec.id));
    }
    Ok(())
}

pub(crate) async fn delete(conn: &mut SqliteConnection, spec_id: &str) -> DomainResult<()> {
    let result = sqlx::query("DELETE FROM specs WHERE id = ?")
        .bind(spec_id)
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DomainError::spec_not_found(spec_id));
    }
    Ok(())
}

pub(crate) async fn get(conn: &mut SqliteConnection, spec_id: &str) -> DomainResult<Option<Spec>> {
    let row: Option<SpecRow> = sqlx::query_as("SELECT * FROM specs WHERE id = ?")
        .bind(spec_id)
        .fetch_optional(conn)
        .await?;
    row.map(Spec::try_from).transpose()
}

pub(crate) async fn list(
    conn: &mut SqliteConnection,
    status: Option<SpecStatus>,
) -> DomainResult<Vec<Spec>> {
    let rows: Vec<SpecRow> = if let Some(status) = status {
        sqlx::query_as("SELECT * FROM specs WHERE status = ? ORDER BY updated_at DESC")
            .bind(status.as_str())
            .fetch_all(conn)
            .await?
    } else {
        sqlx::query_as("SELECT * FROM specs ORDER BY updated_at DESC")
            .fetch_all(conn)
            .await?
    };
    rows.into_iter().map(Spec::try_from).collect()
}
