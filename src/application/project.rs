//! The project context: an explicit handle bundling root, config, and
//! store. Components receive this instead of reaching for globals.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::infrastructure::config::Config;
use crate::services::{Store, StoreOptions, DEFAULT_MAX_SLOTS};

/// Sentinel directory that marks a project root.
pub const CONFIG_DIR: &str = ".specforge";

/// Change-log file name inside the config directory.
pub const CHANGELOG_FILE: &str = "specs.jsonl";

const CONSTITUTION_TEMPLATE: &str = "\
# {project} Constitution

Project guidelines the agents must follow. Edit freely; the execution
engine treats this file as opaque.

## Principles

- Keep changes scoped to the task at hand.
- Prefer existing patterns in the codebase over new ones.
- Leave the tree buildable after every task.
";

/// A loaded project.
#[derive(Debug)]
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
    pub store: Arc<Store>,
}

impl Project {
    /// Initialize a project at `path`, scaffolding the config directory,
    /// spec tree, and workspace area. Re-running against an existing
    /// project is safe; `update` refreshes template files.
    pub async fn init(path: &Path, update: bool) -> DomainResult<Project> {
        let root = path.to_path_buf();
        let config_dir = root.join(CONFIG_DIR);

        for dir in [
            config_dir.clone(),
            config_dir.join("memory"),
            root.join("specs"),
            root.join(".worktrees"),
        ] {
            std::fs::create_dir_all(&dir)?;
        }

        // Workspaces never belong in version control.
        let gitignore = root.join(".worktrees").join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "*\n!.gitignore\n")?;
        }

        let config_path = config_dir.join("config.yaml");
        if !config_path.exists() {
            let project_name = root
                .file_name()
                .map_or_else(|| "project".to_string(), |n| n.to_string_lossy().into_owned());
            Config::write_default(&config_path, &project_name)?;
        }

        let config = Config::load(&config_path)?;

        let constitution = config_dir.join("constitution.md");
        if update || !constitution.exists() {
            std::fs::write(
                &constitution,
                CONSTITUTION_TEMPLATE.replace("{project}", &config.project_name),
            )?;
        }

        let project = Self::open(root, config).await?;
        info!(root = %project.root.display(), "Project initialized");
        Ok(project)
    }

    /// Load the project containing `start`, walking up until the
    /// sentinel directory is found.
    pub async fn load_from(start: &Path) -> DomainResult<Project> {
        let root = find_root(start).ok_or(DomainError::NotAProject)?;
        let config = Config::load(&root.join(CONFIG_DIR).join("config.yaml"))?;
        let project = Self::open(root, config).await?;

        if project.config.sync_jsonl {
            // Fold the log into the store so externally-synced records
            // (e.g. pulled through git) are visible.
            let applied = project.store.import_changes().await?;
            debug!(applied, "Replayed change log on load");
        }

        Ok(project)
    }

    /// Load the project from the current working directory.
    pub async fn load() -> DomainResult<Project> {
        let cwd = std::env::current_dir()?;
        Self::load_from(&cwd).await
    }

    async fn open(root: PathBuf, config: Config) -> DomainResult<Project> {
        let db_path = root.join(&config.database_path);
        let changelog_path = config
            .sync_jsonl
            .then(|| root.join(CONFIG_DIR).join(CHANGELOG_FILE));

        let store = Store::open(
            &db_path,
            StoreOptions {
                max_slots: DEFAULT_MAX_SLOTS,
                changelog_path,
            },
        )
        .await?;

        Ok(Project {
            root,
            config,
            store: Arc::new(store),
        })
    }

    /// Directory holding a spec's documents.
    pub fn spec_dir(&self, spec_id: &str) -> PathBuf {
        self.root.join("specs").join(spec_id)
    }
}

fn find_root(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(CONFIG_DIR).is_dir() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}
