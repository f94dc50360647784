//! Spec domain model.
//!
//! A spec is a unit of work above the task level, typically corresponding
//! to one human-authored requirement document.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecStatus {
    /// Ingested but not yet clarified
    Draft,
    /// Clarifying questions are being answered
    Clarifying,
    /// Specification document produced
    Specified,
    /// Specification approved by a human
    Approved,
    /// Plan generation in progress
    Planning,
    /// Plan produced
    Planned,
    /// Tasks are being executed
    Implementing,
    /// All tasks done
    Completed,
    /// Retired without completion
    Archived,
}

impl Default for SpecStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl SpecStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Clarifying => "clarifying",
            Self::Specified => "specified",
            Self::Approved => "approved",
            Self::Planning => "planning",
            Self::Planned => "planned",
            Self::Implementing => "implementing",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "clarifying" => Some(Self::Clarifying),
            "specified" => Some(Self::Specified),
            "approved" => Some(Self::Approved),
            "planning" => Some(Self::Planning),
            "planned" => Some(Self::Planned),
            "implementing" => Some(Self::Implementing),
            "completed" => Some(Self::Completed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Archived)
    }
}

/// Kind of source document a spec was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Business requirements document
    Brd,
    /// Product requirements document
    Prd,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brd => "brd",
            Self::Prd => "prd",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "brd" => Some(Self::Brd),
            "prd" => Some(Self::Prd),
            _ => None,
        }
    }
}

/// A unit of work above the task level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    /// Stable kebab-case identifier
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Lifecycle status
    pub status: SpecStatus,
    /// Source document kind, if ingested from one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Spec {
    /// Create a new draft spec.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            status: SpecStatus::default(),
            source_type: None,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Set the source document kind (builder method).
    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    /// Set the initial status (builder method).
    pub fn with_status(mut self, status: SpecStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark the spec as updated now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Validate the spec's shape. Ids must be non-empty kebab-case.
    pub fn validate(&self) -> DomainValidation {
        if self.id.is_empty() {
            return Err("Spec id cannot be empty".to_string());
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(format!(
                "Spec id must be kebab-case (lowercase, digits, dashes): {}",
                self.id
            ));
        }
        if self.title.trim().is_empty() {
            return Err("Spec title cannot be empty".to_string());
        }
        if self.created_at > self.updated_at {
            return Err("Spec created_at must not exceed updated_at".to_string());
        }
        Ok(())
    }
}

type DomainValidation = Result<(), String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_creation_defaults() {
        let spec = Spec::new("auth-service", "Auth Service");
        assert_eq!(spec.status, SpecStatus::Draft);
        assert!(spec.source_type.is_none());
        assert!(spec.created_at <= spec.updated_at);
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            "draft",
            "clarifying",
            "specified",
            "approved",
            "planning",
            "planned",
            "implementing",
            "completed",
            "archived",
        ] {
            let status = SpecStatus::from_str(s).unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!(SpecStatus::from_str("bogus").is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(SpecStatus::Completed.is_terminal());
        assert!(SpecStatus::Archived.is_terminal());
        assert!(!SpecStatus::Implementing.is_terminal());
    }

    #[test]
    fn test_validate_rejects_bad_ids() {
        assert!(Spec::new("", "t").validate().is_err());
        assert!(Spec::new("Has Caps", "t").validate().is_err());
        assert!(Spec::new("under_score", "t").validate().is_err());
        assert!(Spec::new("auth-v2", "t").validate().is_ok());
    }

    #[test]
    fn test_touch_bumps_updated_at() {
        let mut spec = Spec::new("a-b", "t");
        let before = spec.updated_at;
        spec.touch();
        assert!(spec.updated_at >= before);
    }
}
