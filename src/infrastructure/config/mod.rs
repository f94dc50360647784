//! Project configuration.
//!
//! `config.yaml` inside the project's `.specforge/` directory, merged
//! with `SPECFORGE_*` environment variables.

use std::collections::HashMap;
use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// Recognized configuration keys and their effects on the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Label only
    pub project_name: String,
    /// Relative path of the backing store
    pub database_path: String,
    /// Mirror every store mutation to the change log, and replay it on
    /// project load
    pub sync_jsonl: bool,
    /// Default agent timeout
    pub timeout_minutes: u64,
    /// Optional model pin per role name
    pub agent_models: HashMap<String, String>,
    /// Opaque to the engine
    pub docs_output_dir: Option<String>,
    /// Executable used to invoke the coding agent
    pub agent_command: String,
    /// Mainline branch task branches derive from and merge into
    pub base_branch: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_name: "project".to_string(),
            database_path: ".specforge/specforge.db".to_string(),
            sync_jsonl: true,
            timeout_minutes: 10,
            agent_models: HashMap::new(),
            docs_output_dir: None,
            agent_command: "claude".to_string(),
            base_branch: "main".to_string(),
        }
    }
}

impl Config {
    /// Load config from the given YAML file, layered over defaults and
    /// under `SPECFORGE_*` environment overrides.
    pub fn load(config_path: &Path) -> DomainResult<Self> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(config_path))
            .merge(Env::prefixed("SPECFORGE_"))
            .extract()
            .map_err(|e| DomainError::Config(e.to_string()))
    }

    /// Write a default config for a new project.
    pub fn write_default(config_path: &Path, project_name: &str) -> DomainResult<()> {
        let config = Config {
            project_name: project_name.to_string(),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config)
            .map_err(|e| DomainError::Config(e.to_string()))?;
        std::fs::write(config_path, yaml)?;
        Ok(())
    }

    /// Agent timeout as a duration.
    pub fn agent_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_minutes * 60)
    }
}
