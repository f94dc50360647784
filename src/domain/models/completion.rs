//! Completion specs: what "done" means for a task, per agent role.
//!
//! A `Verification` is a tagged variant owning its method-specific
//! configuration. The free-form `verification_config` mapping from
//! completion-spec files exists only at the ingest boundary; it is
//! converted into the sum type before any dispatch happens.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::agent::AgentRole;

/// How a stage's completion promise is verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Verification {
    /// Output must contain the criteria's promise string.
    StringMatch,
    /// A command is run in the workspace; its exit code decides.
    External {
        command: String,
        #[serde(default)]
        success_exit_code: i32,
    },
    /// The agent tool grades the output against the description.
    Semantic,
    /// Every nested criterion must pass, in order.
    MultiStage { stages: Vec<CompletionCriteria> },
}

impl Verification {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::StringMatch => "string_match",
            Self::External { .. } => "external",
            Self::Semantic => "semantic",
            Self::MultiStage { .. } => "multi_stage",
        }
    }
}

/// Exit condition for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionCriteria {
    /// Literal string the agent must emit
    pub promise: String,
    /// Prose description of the criterion
    #[serde(default)]
    pub description: String,
    /// Verification method with its configuration
    #[serde(flatten)]
    pub verification: Verification,
    /// Per-stage override of the iteration budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

impl CompletionCriteria {
    /// Split into the (method, config-json) column pair used by the
    /// normalized store tables.
    pub fn to_parts(&self) -> (String, Option<serde_json::Value>) {
        let method = self.verification.method_name().to_string();
        let config = match &self.verification {
            Verification::StringMatch | Verification::Semantic => None,
            Verification::External {
                command,
                success_exit_code,
            } => Some(serde_json::json!({
                "command": command,
                "success_exit_code": success_exit_code,
            })),
            Verification::MultiStage { stages } => Some(serde_json::json!({
                "stages": stages,
            })),
        };
        (method, config)
    }

    /// Rebuild from the (method, config-json) column pair.
    ///
    /// Unknown methods and malformed configs are rejected; the stored
    /// schema is the only place these strings come from, so a mismatch
    /// means corruption rather than user error.
    pub fn from_parts(
        promise: String,
        description: String,
        method: &str,
        config: Option<serde_json::Value>,
        max_iterations: Option<u32>,
    ) -> Result<Self, String> {
        let verification = match method {
            "string_match" => Verification::StringMatch,
            "semantic" => Verification::Semantic,
            "external" => {
                let config = config.ok_or("external verification requires a config")?;
                let command = config
                    .get("command")
                    .and_then(|v| v.as_str())
                    .ok_or("external verification requires a command")?
                    .to_string();
                let success_exit_code = config
                    .get("success_exit_code")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0) as i32;
                Verification::External {
                    command,
                    success_exit_code,
                }
            }
            "multi_stage" => {
                let config = config.ok_or("multi_stage verification requires a config")?;
                let stages = config
                    .get("stages")
                    .cloned()
                    .ok_or("multi_stage verification requires stages")?;
                let stages: Vec<CompletionCriteria> = serde_json::from_value(stages)
                    .map_err(|e| format!("invalid nested criteria: {e}"))?;
                Verification::MultiStage { stages }
            }
            other => return Err(format!("unknown verification method: {other}")),
        };
        Ok(Self {
            promise,
            description,
            verification,
            max_iterations,
        })
    }
}

/// Defines "done" for one task: an outcome, acceptance criteria, and
/// optional per-role exit conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletionSpec {
    /// Prose statement of the desired outcome
    pub outcome: String,
    /// Ordered acceptance criteria
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coder: Option<CompletionCriteria>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<CompletionCriteria>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tester: Option<CompletionCriteria>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa: Option<CompletionCriteria>,
}

impl TaskCompletionSpec {
    /// Criteria for a given role, if declared.
    pub fn criteria_for(&self, role: AgentRole) -> Option<&CompletionCriteria> {
        match role {
            AgentRole::Coder => self.coder.as_ref(),
            AgentRole::Reviewer => self.reviewer.as_ref(),
            AgentRole::Tester => self.tester.as_ref(),
            AgentRole::Qa => self.qa.as_ref(),
        }
    }

    /// Set criteria for a role.
    pub fn set_criteria(&mut self, role: AgentRole, criteria: CompletionCriteria) {
        match role {
            AgentRole::Coder => self.coder = Some(criteria),
            AgentRole::Reviewer => self.reviewer = Some(criteria),
            AgentRole::Tester => self.tester = Some(criteria),
            AgentRole::Qa => self.qa = Some(criteria),
        }
    }

    /// Iterate declared (role, criteria) pairs.
    pub fn all_criteria(&self) -> impl Iterator<Item = (AgentRole, &CompletionCriteria)> {
        AgentRole::all()
            .into_iter()
            .filter_map(move |role| self.criteria_for(role).map(|c| (role, c)))
    }

    /// Validate the spec before persistence: the errors a user can cause
    /// through CLI options or completion files.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.outcome.trim().is_empty() {
            problems.push("completion spec outcome cannot be empty".to_string());
        }
        for (role, criteria) in self.all_criteria() {
            validate_criteria(role.as_str(), criteria, &mut problems);
        }
        problems
    }
}

fn validate_criteria(label: &str, criteria: &CompletionCriteria, problems: &mut Vec<String>) {
    if criteria.promise.trim().is_empty() {
        problems.push(format!("{label}: promise cannot be empty"));
    }
    if let Some(0) = criteria.max_iterations {
        problems.push(format!("{label}: max_iterations must be positive"));
    }
    match &criteria.verification {
        Verification::External { command, .. } => {
            if command.trim().is_empty() {
                problems.push(format!("{label}: external verification requires a command"));
            }
        }
        Verification::MultiStage { stages } => {
            if stages.is_empty() {
                problems.push(format!("{label}: multi_stage verification requires stages"));
            }
            for (i, nested) in stages.iter().enumerate() {
                validate_criteria(&format!("{label}.stages[{i}]"), nested, problems);
            }
        }
        Verification::StringMatch | Verification::Semantic => {}
    }
}

/// Boundary form of a criteria entry as it appears in completion-spec
/// files and CLI flags: a method name plus a free-form config mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCriteria {
    pub promise: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_method")]
    pub verification_method: String,
    #[serde(default)]
    pub verification_config: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

fn default_method() -> String {
    "string_match".to_string()
}

impl RawCriteria {
    /// Convert the boundary form into the typed criteria.
    pub fn into_criteria(self) -> Result<CompletionCriteria, String> {
        let config = self.verification_config.map(|map| {
            serde_json::Value::Object(map.into_iter().collect::<serde_json::Map<_, _>>())
        });
        CompletionCriteria::from_parts(
            self.promise,
            self.description,
            &self.verification_method,
            config,
            self.max_iterations,
        )
    }
}

/// Boundary form of a completion-spec file (YAML or JSON).
#[derive(Debug, Clone, Deserialize)]
pub struct RawCompletionSpec {
    pub outcome: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub coder: Option<RawCriteria>,
    #[serde(default)]
    pub reviewer: Option<RawCriteria>,
    #[serde(default)]
    pub tester: Option<RawCriteria>,
    #[serde(default)]
    pub qa: Option<RawCriteria>,
}

impl RawCompletionSpec {
    pub fn into_spec(self) -> Result<TaskCompletionSpec, String> {
        let mut spec = TaskCompletionSpec {
            outcome: self.outcome,
            acceptance_criteria: self.acceptance_criteria,
            ..Default::default()
        };
        for (role, raw) in [
            (AgentRole::Coder, self.coder),
            (AgentRole::Reviewer, self.reviewer),
            (AgentRole::Tester, self.tester),
            (AgentRole::Qa, self.qa),
        ] {
            if let Some(raw) = raw {
                spec.set_criteria(role, raw.into_criteria()?);
            }
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_match(promise: &str) -> CompletionCriteria {
        CompletionCriteria {
            promise: promise.to_string(),
            description: String::new(),
            verification: Verification::StringMatch,
            max_iterations: None,
        }
    }

    #[test]
    fn test_parts_round_trip_string_match() {
        let criteria = string_match("DONE");
        let (method, config) = criteria.to_parts();
        assert_eq!(method, "string_match");
        assert!(config.is_none());
        let back = CompletionCriteria::from_parts(
            "DONE".into(),
            String::new(),
            &method,
            config,
            None,
        )
        .unwrap();
        assert_eq!(back, criteria);
    }

    #[test]
    fn test_parts_round_trip_external() {
        let criteria = CompletionCriteria {
            promise: "TESTS PASSED".into(),
            description: "run the suite".into(),
            verification: Verification::External {
                command: "cargo test".into(),
                success_exit_code: 0,
            },
            max_iterations: Some(5),
        };
        let (method, config) = criteria.to_parts();
        assert_eq!(method, "external");
        let back = CompletionCriteria::from_parts(
            "TESTS PASSED".into(),
            "run the suite".into(),
            &method,
            config,
            Some(5),
        )
        .unwrap();
        assert_eq!(back, criteria);
    }

    #[test]
    fn test_parts_round_trip_multi_stage() {
        let criteria = CompletionCriteria {
            promise: "ALL GOOD".into(),
            description: String::new(),
            verification: Verification::MultiStage {
                stages: vec![string_match("A"), string_match("B")],
            },
            max_iterations: None,
        };
        let (method, config) = criteria.to_parts();
        assert_eq!(method, "multi_stage");
        let back = CompletionCriteria::from_parts(
            "ALL GOOD".into(),
            String::new(),
            &method,
            config,
            None,
        )
        .unwrap();
        assert_eq!(back, criteria);
    }

    #[test]
    fn test_unknown_method_rejected() {
        let result =
            CompletionCriteria::from_parts("p".into(), String::new(), "telepathy", None, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_catches_empty_promise_and_command() {
        let mut spec = TaskCompletionSpec {
            outcome: "works".into(),
            ..Default::default()
        };
        spec.set_criteria(
            AgentRole::Coder,
            CompletionCriteria {
                promise: "  ".into(),
                description: String::new(),
                verification: Verification::External {
                    command: String::new(),
                    success_exit_code: 0,
                },
                max_iterations: None,
            },
        );
        let problems = spec.validate();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn test_validation_empty_outcome() {
        let spec = TaskCompletionSpec::default();
        assert!(!spec.validate().is_empty());
    }

    #[test]
    fn test_raw_spec_yaml_ingest() {
        let yaml = r#"
outcome: Login endpoint works
acceptance_criteria:
  - Returns 200 on valid credentials
  - Returns 401 on invalid credentials
coder:
  promise: IMPLEMENTATION COMPLETE
  verification_method: string_match
tester:
  promise: TESTS PASSED
  verification_method: external
  verification_config:
    command: cargo test
    success_exit_code: 0
  max_iterations: 4
"#;
        let raw: RawCompletionSpec = serde_yaml::from_str(yaml).unwrap();
        let spec = raw.into_spec().unwrap();
        assert_eq!(spec.acceptance_criteria.len(), 2);
        assert!(matches!(
            spec.criteria_for(AgentRole::Coder).unwrap().verification,
            Verification::StringMatch
        ));
        let tester = spec.criteria_for(AgentRole::Tester).unwrap();
        assert_eq!(tester.max_iterations, Some(4));
        assert!(matches!(
            tester.verification,
            Verification::External { ref command, success_exit_code: 0 } if command == "cargo test"
        ));
        assert!(spec.validate().is_empty());
    }

    #[test]
    fn test_criteria_for_roles() {
        let mut spec = TaskCompletionSpec {
            outcome: "o".into(),
            ..Default::default()
        };
        spec.set_criteria(AgentRole::Qa, string_match("QA PASSED"));
        assert!(spec.criteria_for(AgentRole::Coder).is_none());
        assert_eq!(
            spec.criteria_for(AgentRole::Qa).unwrap().promise,
            "QA PASSED"
        );
        assert_eq!(spec.all_criteria().count(), 1);
    }
}
