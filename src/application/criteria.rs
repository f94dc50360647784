//! Completion judgement: decide whether a stage iteration succeeded.
//!
//! Built-in indicator classification is a pure function of the agent
//! output; custom criteria add external commands and semantic grading,
//! which go through the workspace and the agent invoker respectively.

use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentRole, CompletionCriteria, Verification};
use crate::domain::ports::{AgentInvoker, AgentRequest};

/// Output shorter than this with no indicator is judged a failure.
const AMBIGUOUS_MIN_LEN: usize = 100;

/// Result of judging one iteration's output.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    /// Whether the promise (or built-in success phrase) appeared
    pub promise_found: bool,
    /// Whether the stage is considered complete
    pub verified: bool,
    /// Short explanation
    pub reason: String,
}

impl Judgement {
    fn pass(promise_found: bool, reason: impl Into<String>) -> Self {
        Self {
            promise_found,
            verified: true,
            reason: reason.into(),
        }
    }

    fn fail(promise_found: bool, reason: impl Into<String>) -> Self {
        Self {
            promise_found,
            verified: false,
            reason: reason.into(),
        }
    }
}

fn success_phrase(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Coder => "IMPLEMENTATION COMPLETE",
        AgentRole::Reviewer => "REVIEW PASSED",
        AgentRole::Tester => "TESTS PASSED",
        AgentRole::Qa => "QA PASSED",
    }
}

fn failure_indicators(role: AgentRole) -> &'static [&'static str] {
    match role {
        AgentRole::Coder => &["BLOCKED:", "ERROR:", "FAILED", "TIMEOUT:"],
        AgentRole::Reviewer => &["REVIEW FAILED"],
        AgentRole::Tester => &["TESTS FAILED"],
        AgentRole::Qa => &["QA FAILED"],
    }
}

/// Classify output against the role's built-in indicators.
///
/// Success phrases match case-insensitively and win over failure
/// indicators. Output with no indicator at all is judged by length and
/// the absence of the word "error".
pub fn judge_builtin(role: AgentRole, output: &str) -> Judgement {
    let lowered = output.to_lowercase();

    let phrase = success_phrase(role);
    if lowered.contains(&phrase.to_lowercase()) {
        return Judgement::pass(true, format!("found success indicator: {phrase}"));
    }

    for indicator in failure_indicators(role) {
        if output.contains(indicator) {
            return Judgement::fail(false, format!("found failure indicator: {indicator}"));
        }
    }

    if output.len() >= AMBIGUOUS_MIN_LEN && !lowered.contains("error") {
        return Judgement::pass(false, "no explicit indicator; output looks substantive");
    }
    Judgement::fail(false, "no success indicator found")
}

/// Verify output against a task's explicit completion criteria.
///
/// Boxed because multi-stage criteria recurse.
pub fn verify_criteria<'a>(
    criteria: &'a CompletionCriteria,
    output: &'a str,
    workspace: &'a Path,
    invoker: &'a dyn AgentInvoker,
    ai_timeout: Duration,
) -> BoxFuture<'a, DomainResult<Judgement>> {
    async move {
        let promise_found = !criteria.promise.is_empty() && output.contains(&criteria.promise);

        match &criteria.verification {
            Verification::StringMatch => {
                if promise_found {
                    Ok(Judgement::pass(
                        true,
                        format!("promise found: {}", criteria.promise),
                    ))
                } else {
                    Ok(Judgement::fail(
                        false,
                        format!("promise not found: {}", criteria.promise),
                    ))
                }
            }

            Verification::External {
                command,
                success_exit_code,
            } => {
                let result = tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .current_dir(workspace)
                    .output()
                    .await;
                match result {
                    Ok(out) => {
                        let code = out.status.code().unwrap_or(-1);
                        if code == *success_exit_code {
                            Ok(Judgement::pass(
                                promise_found,
                                format!("external command exited {code}"),
                            ))
                        } else {
                            Ok(Judgement::fail(
                                promise_found,
                                format!(
                                    "external command exited {code}, expected {success_exit_code}"
                                ),
                            ))
                        }
                    }
                    Err(e) => Ok(Judgement::fail(
                        promise_found,
                        format!("external command failed to run: {e}"),
                    )),
                }
            }

            Verification::Semantic => {
                let prompt = format!(
                    "You are grading whether an agent's output satisfies a completion \
                     criterion.\n\nCRITERION: {}\n\nAGENT OUTPUT:\n{}\n\nDoes the output \
                     satisfy the criterion? Answer with exactly YES or NO on the first line.",
                    if criteria.description.is_empty() {
                        &criteria.promise
                    } else {
                        &criteria.description
                    },
                    output,
                );
                let response = invoker
                    .run(AgentRequest {
                        prompt,
                        cwd: workspace.to_path_buf(),
                        allowed_tools: Vec::new(),
                        timeout: ai_timeout,
                        model: None,
                    })
                    .await?;
                let affirmative = is_affirmative(&response.output);
                if response.ok && affirmative {
                    Ok(Judgement::pass(promise_found, "semantic grading: yes"))
                } else {
                    Ok(Judgement::fail(
                        promise_found,
                        format!("semantic grading: {}", first_line(&response.output)),
                    ))
                }
            }

            Verification::MultiStage { stages } => {
                for (i, nested) in stages.iter().enumerate() {
                    let judgement =
                        verify_criteria(nested, output, workspace, invoker, ai_timeout).await?;
                    if !judgement.verified {
                        return Ok(Judgement::fail(
                            promise_found,
                            format!("stage {} failed: {}", i + 1, judgement.reason),
                        ));
                    }
                }
                Ok(Judgement::pass(
                    promise_found,
                    format!("all {} nested criteria passed", stages.len()),
                ))
            }
        }
    }
    .boxed()
}

fn is_affirmative(reply: &str) -> bool {
    let first = first_line(reply).trim().to_uppercase();
    first.starts_with("YES")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
