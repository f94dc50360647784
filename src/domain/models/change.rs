//! Change records: one line in the append-only change log.
//!
//! The wire format is shared with other tools, so field names, field
//! order, and the null-on-delete convention are fixed:
//! `{"timestamp":"…","entity_type":"spec|task","entity_id":"…",
//!   "change_type":"create|update|delete","data":{…}|null}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which entity kind a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Spec,
    Task,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spec => "spec",
            Self::Task => "task",
        }
    }
}

/// Kind of mutation a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// One line in the change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// When the mutation committed
    pub timestamp: DateTime<Utc>,
    /// Entity kind
    pub entity_type: EntityType,
    /// Entity id
    pub entity_id: String,
    /// Mutation kind
    pub change_type: ChangeType,
    /// Entity snapshot, or null for deletes
    pub data: Option<serde_json::Value>,
}

impl ChangeRecord {
    /// Build a record for a create/update carrying a snapshot.
    pub fn upsert(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        change_type: ChangeType,
        data: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            entity_type,
            entity_id: entity_id.into(),
            change_type,
            data: Some(data),
        }
    }

    /// Build a delete record (no snapshot).
    pub fn delete(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            entity_type,
            entity_id: entity_id.into(),
            change_type: ChangeType::Delete,
            data: None,
        }
    }

    /// Serialize to one JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from one JSONL line. Unknown extra fields are ignored;
    /// unknown entity or change types are errors.
    pub fn from_jsonl(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
