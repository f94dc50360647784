//! Workspace management: isolated per-task working copies.
//!
//! Each task executes in its own git worktree at
//! `<repo_root>/.worktrees/<task_id>`, checked out on a fresh
//! `task/<task_id>` branch derived from the base branch.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::domain::errors::{DomainResult, WorkspaceError};

/// Directory under the repository root that holds task workspaces.
pub const WORKTREES_DIR: &str = ".worktrees";

/// Branch name for a task's workspace.
pub fn task_branch(task_id: &str) -> String {
    format!("task/{task_id}")
}

/// One row of `worktree-list` output.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceInfo {
    pub path: String,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

/// Creates, lists, commits in, and removes per-task working copies.
pub struct WorkspaceManager {
    repo_root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Path a task's workspace lives at.
    pub fn workspace_path(&self, task_id: &str) -> PathBuf {
        self.repo_root.join(WORKTREES_DIR).join(task_id)
    }

    /// Create a workspace for the task on branch `task/<task_id>`.
    ///
    /// Idempotent: if the workspace already exists the existing path is
    /// returned; if only the branch exists, the worktree is attached to
    /// it without creating a new branch.
    #[instrument(skip(self))]
    pub async fn create_workspace(
        &self,
        task_id: &str,
        base_branch: &str,
    ) -> DomainResult<PathBuf> {
        let path = self.workspace_path(task_id);
        if path.exists() {
            debug!(task_id, path = %path.display(), "Workspace already exists, reusing");
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::Vcs(format!("create {WORKTREES_DIR}: {e}")))?;
        }

        let branch = task_branch(task_id);
        let path_str = path.display().to_string();

        if self.branch_exists(&branch).await? {
            self.git(&["worktree", "add", &path_str, &branch]).await?;
        } else {
            self.git(&["worktree", "add", "-b", &branch, &path_str, base_branch])
                .await?;
        }

        info!(task_id, branch, path = %path.display(), "Workspace created");
        Ok(path)
    }

    /// List workspaces under the repository, parsed from porcelain
    /// output. The root checkout itself is excluded.
    pub async fn list_workspaces(&self) -> DomainResult<Vec<WorkspaceInfo>> {
        let output = self.git(&["worktree", "list", "--porcelain"]).await?;
        let worktrees_prefix = self.repo_root.join(WORKTREES_DIR);
        Ok(parse_worktree_list(&output)
            .into_iter()
            .filter(|w| Path::new(&w.path).starts_with(&worktrees_prefix))
            .collect())
    }

    /// Stage all changes in the task's workspace and commit them.
    /// Fails when there is nothing to commit.
    #[instrument(skip(self, message))]
    pub async fn commit_changes(&self, task_id: &str, message: &str) -> DomainResult<String> {
        let path = self.workspace_path(task_id);
        if !path.exists() {
            return Err(WorkspaceError::NotFound(path.display().to_string()).into());
        }

        self.git_in(&path, &["add", "-A"]).await?;

        let status = self.git_in(&path, &["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            return Err(WorkspaceError::Vcs("nothing to commit".to_string()).into());
        }

        self.git_in(&path, &["commit", "-m", message]).await?;
        let hash = self.git_in(&path, &["rev-parse", "HEAD"]).await?;
        Ok(hash.trim().to_string())
    }

    /// Remove the task's workspace. Without `force`, uncommitted
    /// changes make the removal fail with `Dirty`.
    #[instrument(skip(self))]
    pub async fn remove_workspace(&self, task_id: &str, force: bool) -> DomainResult<()> {
        let path = self.workspace_path(task_id);
        if !path.exists() {
            return Err(WorkspaceError::NotFound(path.display().to_string()).into());
        }

        if !force {
            let status = self.git_in(&path, &["status", "--porcelain"]).await?;
            if !status.trim().is_empty() {
                return Err(WorkspaceError::Dirty(path.display().to_string()).into());
            }
        }

        let path_str = path.display().to_string();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);
        self.git(&args).await?;

        info!(task_id, "Workspace removed");
        Ok(())
    }

    async fn branch_exists(&self, branch: &str) -> DomainResult<bool> {
        let status = Command::new("git")
            .current_dir(&self.repo_root)
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| WorkspaceError::Vcs(format!("git show-ref: {e}")))?;
        Ok(status.success())
    }

    async fn git(&self, args: &[&str]) -> DomainResult<String> {
        self.git_in(&self.repo_root.clone(), args).await
    }

    async fn git_in(&self, cwd: &Path, args: &[&str]) -> DomainResult<String> {
        run_git(cwd, args).await
    }
}

/// Run git, classifying failures as `WorkspaceError::Vcs` with stderr
/// attached.
pub(crate) async fn run_git(cwd: &Path, args: &[&str]) -> DomainResult<String> {
    let output = Command::new("git")
        .current_dir(cwd)
        .args(args)
        .output()
        .await
        .map_err(|e| WorkspaceError::Vcs(format!("git {}: {e}", args.join(" "))))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WorkspaceError::Vcs(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        ))
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_worktree_list(porcelain: &str) -> Vec<WorkspaceInfo> {
    let mut result = Vec::new();
    let mut current: Option<WorkspaceInfo> = None;

    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(info) = current.take() {
                result.push(info);
            }
            current = Some(WorkspaceInfo {
                path: path.to_string(),
                branch: None,
                commit: None,
            });
        } else if let Some(commit) = line.strip_prefix("HEAD ") {
            if let Some(ref mut info) = current {
                info.commit = Some(commit.to_string());
            }
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(ref mut info) = current {
                info.branch = Some(
                    branch
                        .strip_prefix("refs/heads/")
                        .unwrap_or(branch)
                        .to_string(),
                );
            }
        }
    }
    if let Some(info) = current {
        result.push(info);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_branch_name() {
        assert_eq!(task_branch("TASK-001"), "task/TASK-001");
    }

    #[test]
    fn test_workspace_path_layout() {
        let mgr = WorkspaceManager::new("/repo");
        assert_eq!(
            mgr.workspace_path("t1"),
            PathBuf::from("/repo/.worktrees/t1")
        );
    }

    #[test]
    fn test_parse_worktree_list() {
        let porcelain = "\
worktree /repo
HEAD aaaa1111
branch refs/heads/main

worktree /repo/.worktrees/t1
HEAD bbbb2222
branch refs/heads/task/t1

worktree /repo/.worktrees/t2
HEAD cccc3333
detached
";
        let parsed = parse_worktree_list(porcelain);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].branch.as_deref(), Some("main"));
        assert_eq!(parsed[1].path, "/repo/.worktrees/t1");
        assert_eq!(parsed[1].branch.as_deref(), Some("task/t1"));
        assert_eq!(parsed[1].commit.as_deref(), Some("bbbb2222"));
        assert!(parsed[2].branch.is_none());
    }
}
