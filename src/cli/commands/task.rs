//! Task commands.

use serde::Serialize;

use crate::application::Project;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::cli::{CompletionOptions, TaskCreateArgs, TaskFollowupArgs};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentRole, CompletionCriteria, FollowupCategory, RawCompletionSpec, Task, TaskCompletionSpec,
    TaskPriority, TaskStatus, Verification,
};

#[derive(Debug, Serialize)]
pub struct TaskOutput {
    pub id: String,
    pub spec_id: String,
    pub title: String,
    pub status: String,
    pub priority: i64,
    pub dependencies: Vec<String>,
    pub assignee: Option<String>,
    pub iteration: u32,
    pub has_completion_spec: bool,
}

impl From<&Task> for TaskOutput {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            spec_id: task.spec_id.clone(),
            title: task.title.clone(),
            status: task.status.as_str().to_string(),
            priority: task.priority.as_i64(),
            dependencies: task.dependencies.clone(),
            assignee: task.assignee.clone(),
            iteration: task.iteration,
            has_completion_spec: task.completion_spec.is_some(),
        }
    }
}

impl CommandOutput for TaskOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Task: {}", self.id),
            format!("Spec: {}", self.spec_id),
            format!("Title: {}", self.title),
            format!("Status: {}", self.status),
            format!("Priority: {}", self.priority),
        ];
        if !self.dependencies.is_empty() {
            lines.push(format!("Depends on: {}", self.dependencies.join(", ")));
        }
        if let Some(ref assignee) = self.assignee {
            lines.push(format!("Assignee: {assignee}"));
        }
        if self.has_completion_spec {
            lines.push("Completion spec: defined".to_string());
        }
        lines.join("\n")
    }
}

fn parse_priority(n: i64) -> DomainResult<TaskPriority> {
    TaskPriority::from_i64(n)
        .ok_or_else(|| DomainError::InvalidArgument(format!("priority must be 1, 2, or 3: {n}")))
}

fn parse_task_status(s: &str) -> DomainResult<TaskStatus> {
    TaskStatus::from_str(s)
        .ok_or_else(|| DomainError::InvalidStatus(format!("unknown task status: {s}")))
}

/// Build the completion spec from a file or per-role CLI flags.
fn build_completion_spec(
    opts: &CompletionOptions,
) -> DomainResult<Option<TaskCompletionSpec>> {
    if let Some(ref path) = opts.completion_file {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DomainError::InvalidArgument(format!("completion file {}: {e}", path.display()))
        })?;
        // YAML is a superset of JSON, so one parser covers both formats.
        let raw: RawCompletionSpec = serde_yaml::from_str(&content).map_err(|e| {
            DomainError::InvalidArgument(format!("completion file {}: {e}", path.display()))
        })?;
        let spec = raw.into_spec().map_err(DomainError::InvalidArgument)?;
        return Ok(Some(spec));
    }

    let role_flags = [
        (AgentRole::Coder, &opts.coder_promise, &opts.coder_verification, &opts.coder_command),
        (
            AgentRole::Reviewer,
            &opts.reviewer_promise,
            &opts.reviewer_verification,
            &opts.reviewer_command,
        ),
        (
            AgentRole::Tester,
            &opts.tester_promise,
            &opts.tester_verification,
            &opts.tester_command,
        ),
        (AgentRole::Qa, &opts.qa_promise, &opts.qa_verification, &opts.qa_command),
    ];

    let any_role = role_flags.iter().any(|(_, promise, _, _)| promise.is_some());
    if opts.outcome.is_none() && opts.acceptance_criteria.is_empty() && !any_role {
        return Ok(None);
    }

    let outcome = opts.outcome.clone().ok_or_else(|| {
        DomainError::InvalidArgument("completion options require --outcome".to_string())
    })?;

    let mut spec = TaskCompletionSpec {
        outcome,
        acceptance_criteria: opts.acceptance_criteria.clone(),
        ..Default::default()
    };

    for (role, promise, method, command) in role_flags {
        let Some(promise) = promise.clone() else {
            continue;
        };
        let method = method.as_deref().unwrap_or("string_match");
        let verification = match method {
            "string_match" => Verification::StringMatch,
            "semantic" => Verification::Semantic,
            "external" => {
                let command = command.clone().ok_or_else(|| {
                    DomainError::InvalidArgument(format!(
                        "--{}-command is required for external verification",
                        role.as_str()
                    ))
                })?;
                Verification::External {
                    command,
                    success_exit_code: 0,
                }
            }
            other => {
                return Err(DomainError::InvalidArgument(format!(
                    "unknown verification method: {other}"
                )))
            }
        };
        spec.set_criteria(
            role,
            CompletionCriteria {
                promise,
                description: String::new(),
                verification,
                max_iterations: None,
            },
        );
    }

    let problems = spec.validate();
    if !problems.is_empty() {
        return Err(DomainError::InvalidArgument(problems.join("; ")));
    }
    Ok(Some(spec))
}

async fn create_task(
    project: &Project,
    args: TaskCreateArgs,
    extra_metadata: Vec<(&str, serde_json::Value)>,
    json: bool,
) -> DomainResult<()> {
    let mut task = Task::new(args.id, args.spec_id, args.title)
        .with_priority(parse_priority(args.priority)?);
    if let Some(description) = args.description {
        task.description = description;
    }
    for dep in args.dependencies {
        let dep = dep.trim();
        if !dep.is_empty() {
            task = task.with_dependency(dep);
        }
    }
    if let Some(assignee) = args.assignee {
        task.assignee = Some(assignee);
    }
    task.completion_spec = build_completion_spec(&args.completion)?;
    for (key, value) in extra_metadata {
        task.metadata.insert(key.to_string(), value);
    }

    project.store.create_task(&task).await?;
    output(&TaskOutput::from(&task), json);
    Ok(())
}

pub async fn handle_create(args: TaskCreateArgs, json: bool) -> DomainResult<()> {
    let project = Project::load().await?;
    create_task(&project, args, Vec::new(), json).await
}

pub async fn handle_followup(args: TaskFollowupArgs, json: bool) -> DomainResult<()> {
    let project = Project::load().await?;

    // The parent must exist and becomes an implicit dependency.
    if project.store.get_task(&args.parent, false).await?.is_none() {
        return Err(DomainError::task_not_found(&args.parent));
    }

    let category = FollowupCategory::from_task_id(&args.id);
    let mut dependencies = vec![args.parent.clone()];
    dependencies.extend(args.dependencies);

    let create_args = TaskCreateArgs {
        id: args.id,
        spec_id: args.spec_id,
        title: args.title,
        description: args.description,
        priority: args.priority,
        dependencies,
        assignee: args.assignee,
        completion: args.completion,
    };
    create_task(
        &project,
        create_args,
        vec![
            ("category", serde_json::json!(category.as_str())),
            ("parent", serde_json::json!(args.parent)),
        ],
        json,
    )
    .await
}

pub async fn handle_update(id: String, status: String, json: bool) -> DomainResult<()> {
    let project = Project::load().await?;
    let status = parse_task_status(&status)?;
    let task = project.store.update_task_status(&id, status).await?;
    output(&TaskOutput::from(&task), json);
    Ok(())
}

#[derive(Debug, Serialize)]
struct TaskListOutput {
    tasks: Vec<TaskOutput>,
    total: usize,
}

impl CommandOutput for TaskListOutput {
    fn to_human(&self) -> String {
        if self.tasks.is_empty() {
            return "No tasks found.".to_string();
        }
        let mut table = list_table(&["id", "title", "status", "prio", "deps"]);
        for task in &self.tasks {
            table.add_row(vec![
                task.id.clone(),
                truncate(&task.title, 36),
                task.status.clone(),
                task.priority.to_string(),
                task.dependencies.join(","),
            ]);
        }
        format!("{} task(s):\n{table}", self.total)
    }
}

pub async fn handle_list(
    spec: Option<String>,
    status: Option<String>,
    json: bool,
) -> DomainResult<()> {
    let project = Project::load().await?;

    let status = status.as_deref().map(parse_task_status).transpose()?;
    let tasks = project.store.list_tasks(spec.as_deref(), status).await?;

    output(
        &TaskListOutput {
            total: tasks.len(),
            tasks: tasks.iter().map(TaskOutput::from).collect(),
        },
        json,
    );
    Ok(())
}
