//! The execution pipeline: drive one task through the staged agent
//! loop.
//!
//! Each stage iterates the agent until its completion criterion is met
//! or the stage's iteration budget runs out; a global cap bounds the
//! total across stages. Each stage's loop is observable through its
//! Ralph-loop record, and cancellation is honored between iterations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentRole, RalphLoopStatus, Task, TaskStatus, VerificationRecord};
use crate::domain::ports::{AgentInvoker, AgentRequest, AgentResponse};
use crate::services::Store;

use super::criteria::{judge_builtin, verify_criteria, Judgement};
use super::prompt::{build_stage_prompt, PromptContext};

/// One stage of the pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: &'static str,
    pub role: AgentRole,
    pub max_iterations: u32,
}

/// The default pipeline: Implementation → Code Review → Testing → QA.
pub fn default_stages() -> Vec<StageSpec> {
    vec![
        StageSpec {
            name: "Implementation",
            role: AgentRole::Coder,
            max_iterations: 3,
        },
        StageSpec {
            name: "Code Review",
            role: AgentRole::Reviewer,
            max_iterations: 2,
        },
        StageSpec {
            name: "Testing",
            role: AgentRole::Tester,
            max_iterations: 2,
        },
        StageSpec {
            name: "QA Validation",
            role: AgentRole::Qa,
            max_iterations: 10,
        },
    ]
}

/// Hard ceiling on iterations across all stages of one task.
pub const DEFAULT_MAX_TOTAL_ITERATIONS: u32 = 10;

/// Task-level status shown while a role's stage runs. QA reuses the
/// reviewing status.
fn stage_status(role: AgentRole) -> TaskStatus {
    match role {
        AgentRole::Coder => TaskStatus::Implementing,
        AgentRole::Reviewer | AgentRole::Qa => TaskStatus::Reviewing,
        AgentRole::Tester => TaskStatus::Testing,
    }
}

/// Pipeline configuration derived from project config.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stages: Vec<StageSpec>,
    pub max_total_iterations: u32,
    pub agent_timeout: Duration,
    /// Optional model pin per role name
    pub agent_models: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            max_total_iterations: DEFAULT_MAX_TOTAL_ITERATIONS,
            agent_timeout: Duration::from_secs(600),
            agent_models: HashMap::new(),
        }
    }
}

/// Why a pipeline run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEnd {
    /// All stages passed; task is done
    Completed,
    /// A stage exhausted its budget; task reset to todo
    StageFailed { stage: &'static str },
    /// The running loop was cancelled; task status left as-is
    Cancelled { stage: &'static str },
}

impl PipelineEnd {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Drives one task at a time through the staged agent loop.
pub struct Pipeline {
    store: Arc<Store>,
    invoker: Arc<dyn AgentInvoker>,
    project_root: PathBuf,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<Store>,
        invoker: Arc<dyn AgentInvoker>,
        project_root: impl Into<PathBuf>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            invoker,
            project_root: project_root.into(),
            config,
        }
    }

    /// Execute the task through every stage. Returns how the run ended;
    /// task state transitions are persisted along the way.
    #[instrument(skip(self, workspace), fields(task_id))]
    pub async fn execute_task(&self, task_id: &str, workspace: &Path) -> DomainResult<PipelineEnd> {
        let mut task = self
            .store
            .get_task(task_id, true)
            .await?
            .ok_or_else(|| DomainError::task_not_found(task_id))?;

        task.worktree = Some(workspace.display().to_string());

        let spec_document = self.read_spec_file(&task.spec_id, "spec.md").await;
        let plan_document = self.read_spec_file(&task.spec_id, "plan.md").await;

        let mut total_iterations: u32 = 0;

        for stage in &self.config.stages.clone() {
            let criteria = task
                .completion_spec
                .as_ref()
                .and_then(|c| c.criteria_for(stage.role))
                .cloned();
            let stage_budget = criteria
                .as_ref()
                .and_then(|c| c.max_iterations)
                .unwrap_or(stage.max_iterations);

            self.store
                .register_ralph_loop(&task.id, stage.role, stage_budget)
                .await?;

            let mut stage_passed = false;
            let mut iteration: u32 = 0;
            let mut last_output = String::new();

            while iteration < stage_budget && total_iterations < self.config.max_total_iterations {
                if iteration > 0 && self.loop_cancelled(&task.id, stage.role).await? {
                    info!(task_id = %task.id, stage = stage.name, "Loop cancelled, aborting stage");
                    return Ok(PipelineEnd::Cancelled { stage: stage.name });
                }

                iteration += 1;
                total_iterations += 1;

                task.status = stage_status(stage.role);
                task.iteration = total_iterations;
                self.store.update_task(&mut task).await?;

                let judgement = self
                    .run_iteration(
                        &task,
                        stage,
                        iteration,
                        workspace,
                        spec_document.as_deref(),
                        plan_document.as_deref(),
                        criteria.as_ref(),
                        &mut last_output,
                    )
                    .await?;

                let appended = self
                    .store
                    .update_ralph_loop(
                        &task.id,
                        stage.role,
                        Some(iteration),
                        Some(&VerificationRecord {
                            iteration,
                            promise_found: judgement.promise_found,
                            verified: judgement.verified,
                            reason: judgement.reason.clone(),
                        }),
                    )
                    .await;
                match appended {
                    Ok(_) => {}
                    // The running row can disappear when the loop is
                    // cancelled while the agent was working.
                    Err(DomainError::NotFound { .. })
                        if self.loop_cancelled(&task.id, stage.role).await? =>
                    {
                        info!(task_id = %task.id, stage = stage.name, "Loop cancelled mid-iteration");
                        return Ok(PipelineEnd::Cancelled { stage: stage.name });
                    }
                    Err(err) => return Err(err),
                }

                if judgement.verified {
                    stage_passed = true;
                    break;
                }
            }

            if !stage_passed {
                warn!(
                    task_id = %task.id,
                    stage = stage.name,
                    iterations = iteration,
                    "Stage budget exhausted, resetting task"
                );
                task.status = TaskStatus::Todo;
                task.record_failure(stage.name, &last_output);
                self.store.update_task(&mut task).await?;
                self.store
                    .complete_ralph_loop(&task.id, stage.role, false)
                    .await?;
                return Ok(PipelineEnd::StageFailed { stage: stage.name });
            }

            self.store
                .complete_ralph_loop(&task.id, stage.role, true)
                .await?;
        }

        task.status = TaskStatus::Done;
        self.store.update_task(&mut task).await?;
        info!(task_id = %task.id, iterations = total_iterations, "Pipeline completed");
        Ok(PipelineEnd::Completed)
    }

    /// One agent invocation plus judgement and bookkeeping.
    #[allow(clippy::too_many_arguments)]
    async fn run_iteration(
        &self,
        task: &Task,
        stage: &StageSpec,
        iteration: u32,
        workspace: &Path,
        spec_document: Option<&str>,
        plan_document: Option<&str>,
        criteria: Option<&crate::domain::models::CompletionCriteria>,
        last_output: &mut String,
    ) -> DomainResult<Judgement> {
        let agent = self
            .store
            .register_agent(
                &task.id,
                stage.role,
                None,
                Some(&workspace.display().to_string()),
            )
            .await;
        let agent = match agent {
            Ok(agent) => agent,
            Err(err @ DomainError::SlotsExhausted(_)) => {
                // Fail fast rather than queueing behind other pipelines.
                self.store
                    .complete_ralph_loop(&task.id, stage.role, false)
                    .await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let prompt = build_stage_prompt(&PromptContext {
            task,
            stage_name: stage.name,
            role: stage.role,
            iteration,
            workspace: &workspace.display().to_string(),
            spec_document,
            plan_document,
        });

        let request = AgentRequest {
            prompt,
            cwd: workspace.to_path_buf(),
            allowed_tools: stage
                .role
                .allowed_tools()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            timeout: self.config.agent_timeout,
            model: self.config.agent_models.get(stage.role.as_str()).cloned(),
        };

        let started = Instant::now();
        let response = match self.invoker.run(request).await {
            Ok(response) => response,
            Err(err) => {
                // Runner failures count as iteration failures; they never
                // bubble out of the pipeline.
                warn!(task_id = %task.id, error = %err, "Agent invocation failed");
                AgentResponse {
                    output: format!("ERROR: {err}"),
                    session_id: None,
                    ok: false,
                }
            }
        };
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let judgement = if let Some(criteria) = criteria {
            match verify_criteria(
                criteria,
                &response.output,
                workspace,
                self.invoker.as_ref(),
                self.config.agent_timeout,
            )
            .await
            {
                Ok(judgement) => judgement,
                // Verification-layer failures count as iteration
                // failures, same as runner failures.
                Err(err) => Judgement {
                    promise_found: false,
                    verified: false,
                    reason: format!("verification error: {err}"),
                },
            }
        } else {
            judge_builtin(stage.role, &response.output)
        };

        self.store
            .log_execution(
                &task.id,
                stage.role,
                stage.name,
                &response.output,
                judgement.verified,
                duration_ms,
            )
            .await?;

        *last_output = response.output;

        debug_assert!(agent.slot >= 1);
        self.store.deregister_agent_by_task(&task.id).await?;

        Ok(judgement)
    }

    async fn loop_cancelled(&self, task_id: &str, role: AgentRole) -> DomainResult<bool> {
        let running = self.store.get_running_ralph_loop(task_id, role).await?;
        match running {
            Some(_) => Ok(false),
            None => {
                // The running row is gone or no longer running: check the
                // latest record to distinguish cancellation.
                let latest = self.store.get_ralph_loop(task_id, Some(role)).await?;
                Ok(matches!(
                    latest.map(|l| l.status),
                    Some(RalphLoopStatus::Cancelled)
                ))
            }
        }
    }

    async fn read_spec_file(&self, spec_id: &str, file: &str) -> Option<String> {
        let path = self.project_root.join("specs").join(spec_id).join(file);
        tokio::fs::read_to_string(path).await.ok()
    }
}
