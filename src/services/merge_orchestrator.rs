//! Merge orchestration: bring a task branch back to the base branch.
//!
//! Three tiers, each attempted only when the previous one fails:
//! a plain no-ff merge, AI resolution of individual conflict regions,
//! and whole-file AI reconciliation (declined in this version). The
//! caller serializes merges; on failure the repository is left clean.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainResult, WorkspaceError};
use crate::domain::ports::{AgentInvoker, AgentRequest};

use super::worktree_manager::{run_git, task_branch};

/// Result of a merge attempt.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MergeOutcome {
    pub success: bool,
    pub message: String,
}

impl MergeOutcome {
    fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

struct MergeContext<'a> {
    repo_root: &'a Path,
    source: &'a str,
    target: &'a str,
    invoker: &'a dyn AgentInvoker,
    ai_timeout: Duration,
}

#[async_trait]
trait MergeStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn attempt(&self, ctx: &MergeContext<'_>) -> DomainResult<MergeOutcome>;
}

/// Tier 1: plain git merge, aborted on conflict.
struct GitAutoMerge;

#[async_trait]
impl MergeStrategy for GitAutoMerge {
    fn name(&self) -> &'static str {
        "auto-merge"
    }

    async fn attempt(&self, ctx: &MergeContext<'_>) -> DomainResult<MergeOutcome> {
        run_git(ctx.repo_root, &["checkout", ctx.target]).await?;

        let message = format!("Merge {} into {}", ctx.source, ctx.target);
        match run_git(
            ctx.repo_root,
            &["merge", "--no-ff", "-m", &message, ctx.source],
        )
        .await
        {
            Ok(_) => Ok(MergeOutcome::success(format!(
                "merged {} into {}",
                ctx.source, ctx.target
            ))),
            Err(err) => {
                let text = err.to_string();
                abort_merge(ctx.repo_root).await;
                if text.to_lowercase().contains("conflict") {
                    Ok(MergeOutcome::failure(format!(
                        "merge conflicts detected: {text}"
                    )))
                } else {
                    Ok(MergeOutcome::failure(format!("merge failed: {text}")))
                }
            }
        }
    }
}

/// Tier 2: redo the merge, then have the agent resolve each conflicted
/// file's marker regions. Output that still carries markers is rejected.
struct ConflictOnlyAiMerge;

#[async_trait]
impl MergeStrategy for ConflictOnlyAiMerge {
    fn name(&self) -> &'static str {
        "ai-conflict-resolution"
    }

    async fn attempt(&self, ctx: &MergeContext<'_>) -> DomainResult<MergeOutcome> {
        run_git(ctx.repo_root, &["checkout", ctx.target]).await?;

        let merged_clean = run_git(
            ctx.repo_root,
            &["merge", "--no-ff", "--no-commit", ctx.source],
        )
        .await
        .is_ok();

        let commit_message = format!("Merge {} into {}", ctx.source, ctx.target);
        if merged_clean {
            run_git(ctx.repo_root, &["commit", "-m", &commit_message]).await?;
            return Ok(MergeOutcome::success("no conflicts on retry"));
        }

        let conflicted = match run_git(
            ctx.repo_root,
            &["diff", "--name-only", "--diff-filter=U"],
        )
        .await
        {
            Ok(output) => output
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect::<Vec<_>>(),
            Err(err) => {
                abort_merge(ctx.repo_root).await;
                return Ok(MergeOutcome::failure(format!(
                    "failed to read conflict set: {err}"
                )));
            }
        };

        if conflicted.is_empty() {
            // Merge failed for a reason other than content conflicts.
            abort_merge(ctx.repo_root).await;
            return Ok(MergeOutcome::failure(
                "merge failed without a resolvable conflict set",
            ));
        }

        let mut resolved = 0usize;
        let mut failures: Vec<String> = Vec::new();

        for file in &conflicted {
            match resolve_file(ctx, file).await {
                Ok(()) => {
                    if let Err(err) = run_git(ctx.repo_root, &["add", file]).await {
                        failures.push(format!("{file}: failed to stage: {err}"));
                    } else {
                        resolved += 1;
                    }
                }
                Err(reason) => failures.push(format!("{file}: {reason}")),
            }
        }

        if !failures.is_empty() {
            abort_merge(ctx.repo_root).await;
            return Ok(MergeOutcome::failure(format!(
                "AI resolution failed for {} file(s): {}",
                failures.len(),
                failures
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; ")
            )));
        }

        let ai_message = format!("{commit_message} (AI-resolved conflicts)");
        match run_git(ctx.repo_root, &["commit", "-m", &ai_message]).await {
            Ok(_) => Ok(MergeOutcome::success(format!(
                "AI resolved conflicts in {resolved} file(s)"
            ))),
            Err(err) => {
                abort_merge(ctx.repo_root).await;
                Ok(MergeOutcome::failure(format!(
                    "failed to commit after resolution: {err}"
                )))
            }
        }
    }
}

/// Tier 3: whole-file reconciliation. Declined in this version; callers
/// receive a structured failure rather than a guess.
struct FullFileAiMerge;

#[async_trait]
impl MergeStrategy for FullFileAiMerge {
    fn name(&self) -> &'static str {
        "ai-file-reconciliation"
    }

    async fn attempt(&self, _ctx: &MergeContext<'_>) -> DomainResult<MergeOutcome> {
        Ok(MergeOutcome::failure(
            "whole-file AI reconciliation is not implemented",
        ))
    }
}

async fn resolve_file(ctx: &MergeContext<'_>, file: &str) -> Result<(), String> {
    let full_path = ctx.repo_root.join(file);
    let content = tokio::fs::read_to_string(&full_path)
        .await
        .map_err(|e| format!("failed to read file: {e}"))?;

    if !content.contains("<<<<<<< ") {
        return Ok(());
    }

    let prompt = conflict_prompt(file, &content, ctx.source, ctx.target);
    let response = ctx
        .invoker
        .run(AgentRequest {
            prompt,
            cwd: ctx.repo_root.to_path_buf(),
            allowed_tools: Vec::new(),
            timeout: ctx.ai_timeout,
            model: None,
        })
        .await
        .map_err(|e| e.to_string())?;

    if !response.ok {
        return Err(format!("agent returned an error: {}", response.output));
    }

    let resolved = strip_code_fences(response.output.trim());
    if contains_conflict_markers(resolved) {
        return Err("AI output still contains conflict markers".to_string());
    }

    tokio::fs::write(&full_path, resolved)
        .await
        .map_err(|e| format!("failed to write resolved file: {e}"))?;
    Ok(())
}

fn conflict_prompt(file: &str, content: &str, source: &str, target: &str) -> String {
    format!(
        "You are resolving a git merge conflict. The file below contains conflict markers.\n\
         \n\
         FILE: {file}\n\
         SOURCE BRANCH: {source} (the incoming changes)\n\
         TARGET BRANCH: {target} (HEAD, the current branch)\n\
         \n\
         CONFLICT MARKERS EXPLAINED:\n\
         - `<<<<<<< HEAD` marks the start of the TARGET branch version\n\
         - `=======` separates the two versions\n\
         - `>>>>>>> {source}` marks the end of the SOURCE branch version\n\
         \n\
         YOUR TASK:\n\
         1. Analyze each conflict section\n\
         2. Decide how to merge the changes (keep one side, combine both, or create a new version)\n\
         3. Output ONLY the fully resolved file content with NO conflict markers\n\
         4. Do NOT include any explanation - output ONLY the resolved file content\n\
         \n\
         CONFLICTED FILE CONTENT:\n\
         ```\n\
         {content}\n\
         ```\n\
         \n\
         OUTPUT the resolved file content below (no markdown code blocks, no explanations):"
    )
}

pub(crate) fn contains_conflict_markers(content: &str) -> bool {
    content.contains("<<<<<<<") || content.contains("=======") || content.contains(">>>>>>>")
}

/// Remove a single wrapping markdown fence, when the agent adds one
/// despite instructions.
pub(crate) fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") || !trimmed.ends_with("```") {
        return trimmed;
    }
    let inner = &trimmed[..trimmed.len() - 3];
    match inner.find('\n') {
        Some(pos) => inner[pos + 1..].trim_end_matches('\n'),
        None => trimmed,
    }
}

async fn abort_merge(repo_root: &Path) {
    if let Err(err) = run_git(repo_root, &["merge", "--abort"]).await {
        // Nothing to abort when the merge never started.
        warn!(error = %err, "merge --abort reported an error");
    }
}

/// Orchestrates the tiered merge of task branches into the base branch.
pub struct MergeOrchestrator {
    repo_root: PathBuf,
    invoker: Arc<dyn AgentInvoker>,
    ai_timeout: Duration,
}

impl MergeOrchestrator {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        invoker: Arc<dyn AgentInvoker>,
        ai_timeout: Duration,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            invoker,
            ai_timeout,
        }
    }

    /// Merge `task/<task_id>` into the target branch. On success the
    /// working directory is left on the target with the merge
    /// committed; on failure every attempted merge has been aborted.
    #[instrument(skip(self))]
    pub async fn merge_task(&self, task_id: &str, target: &str) -> DomainResult<MergeOutcome> {
        let source = task_branch(task_id);

        if run_git(&self.repo_root, &["rev-parse", "--verify", &source])
            .await
            .is_err()
        {
            return Ok(MergeOutcome::failure(format!(
                "source branch not found: {source}"
            )));
        }

        let ctx = MergeContext {
            repo_root: &self.repo_root,
            source: &source,
            target,
            invoker: self.invoker.as_ref(),
            ai_timeout: self.ai_timeout,
        };

        let strategies: [&dyn MergeStrategy; 3] =
            [&GitAutoMerge, &ConflictOnlyAiMerge, &FullFileAiMerge];

        let mut last_message = String::new();
        for strategy in strategies {
            let outcome = strategy.attempt(&ctx).await?;
            if outcome.success {
                info!(task_id, strategy = strategy.name(), "Merge succeeded");
                return Ok(MergeOutcome::success(format!(
                    "merged using {}: {}",
                    strategy.name(),
                    outcome.message
                )));
            }
            warn!(task_id, strategy = strategy.name(), message = %outcome.message, "Merge tier failed");
            last_message = outcome.message;
        }

        Ok(MergeOutcome::failure(format!(
            "all merge strategies failed; last error: {last_message}"
        )))
    }

    /// Delete the task branch after a successful merge.
    pub async fn cleanup_branch(&self, task_id: &str) -> DomainResult<bool> {
        let branch = task_branch(task_id);
        match run_git(&self.repo_root, &["branch", "-D", &branch]).await {
            Ok(_) => Ok(true),
            Err(crate::domain::errors::DomainError::Workspace(WorkspaceError::Vcs(_))) => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_marker_detection() {
        assert!(contains_conflict_markers("<<<<<<< HEAD\nx\n"));
        assert!(contains_conflict_markers("a\n=======\nb"));
        assert!(contains_conflict_markers(">>>>>>> task/t1"));
        assert!(!contains_conflict_markers("fn main() {}\n"));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```rust\nfn main() {}\n```"), "fn main() {}");
        assert_eq!(strip_code_fences("```\ntext\n```"), "text");
        assert_eq!(strip_code_fences("plain output"), "plain output");
        // Unfenced content containing backticks elsewhere is untouched.
        assert_eq!(strip_code_fences("a ``` b"), "a ``` b");
    }

    #[test]
    fn test_conflict_prompt_names_both_branches() {
        let prompt = conflict_prompt("src/lib.rs", "content", "task/t1", "main");
        assert!(prompt.contains("SOURCE BRANCH: task/t1"));
        assert!(prompt.contains("TARGET BRANCH: main"));
        assert!(prompt.contains("<<<<<<< HEAD"));
        assert!(prompt.contains(">>>>>>> task/t1"));
    }
}
