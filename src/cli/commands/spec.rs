//! Spec commands.

use std::collections::HashMap;

use serde::Serialize;

use crate::application::Project;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{SourceType, Spec, SpecStatus};

#[derive(Debug, Serialize)]
pub struct SpecOutput {
    pub id: String,
    pub title: String,
    pub status: String,
    pub source_type: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Spec> for SpecOutput {
    fn from(spec: &Spec) -> Self {
        Self {
            id: spec.id.clone(),
            title: spec.title.clone(),
            status: spec.status.as_str().to_string(),
            source_type: spec.source_type.map(|s| s.as_str().to_string()),
            created_at: spec.created_at.to_rfc3339(),
            updated_at: spec.updated_at.to_rfc3339(),
        }
    }
}

impl CommandOutput for SpecOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Spec: {}", self.id),
            format!("Title: {}", self.title),
            format!("Status: {}", self.status),
        ];
        if let Some(ref source) = self.source_type {
            lines.push(format!("Source: {source}"));
        }
        lines.push(format!("Updated: {}", self.updated_at));
        lines.join("\n")
    }
}

fn parse_status(s: &str) -> DomainResult<SpecStatus> {
    SpecStatus::from_str(s)
        .ok_or_else(|| DomainError::InvalidStatus(format!("unknown spec status: {s}")))
}

pub async fn handle_create(
    id: String,
    title: Option<String>,
    source_type: Option<String>,
    status: Option<String>,
    json: bool,
) -> DomainResult<()> {
    let project = Project::load().await?;

    let mut spec = Spec::new(id.clone(), title.unwrap_or_else(|| id.clone()));
    if let Some(ref source) = source_type {
        spec.source_type = Some(SourceType::from_str(source).ok_or_else(|| {
            DomainError::InvalidArgument(format!("unknown source type: {source}"))
        })?);
    }
    if let Some(ref status) = status {
        spec.status = parse_status(status)?;
    }

    project.store.create_spec(&spec).await?;
    output(&SpecOutput::from(&spec), json);
    Ok(())
}

pub async fn handle_update(
    id: String,
    status: Option<String>,
    title: Option<String>,
    json: bool,
) -> DomainResult<()> {
    let project = Project::load().await?;

    let mut spec = project
        .store
        .get_spec(&id)
        .await?
        .ok_or_else(|| DomainError::spec_not_found(&id))?;

    if let Some(ref status) = status {
        spec.status = parse_status(status)?;
    }
    if let Some(title) = title {
        spec.title = title;
    }

    project.store.update_spec(&mut spec).await?;
    output(&SpecOutput::from(&spec), json);
    Ok(())
}

#[derive(Debug, Serialize)]
struct SpecDetailOutput {
    #[serde(flatten)]
    spec: SpecOutput,
    task_counts: HashMap<String, usize>,
    total_tasks: usize,
}

impl CommandOutput for SpecDetailOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.spec.to_human()];
        lines.push(format!("Tasks: {}", self.total_tasks));
        let mut counts: Vec<_> = self.task_counts.iter().collect();
        counts.sort_by_key(|(status, _)| status.as_str().to_string());
        for (status, n) in counts {
            lines.push(format!("  {status}: {n}"));
        }
        lines.join("\n")
    }
}

pub async fn handle_get(id: String, json: bool) -> DomainResult<()> {
    let project = Project::load().await?;

    let spec = project
        .store
        .get_spec(&id)
        .await?
        .ok_or_else(|| DomainError::spec_not_found(&id))?;

    let by_status = project.store.get_tasks_by_status(&id).await?;
    let mut task_counts = HashMap::new();
    let mut total_tasks = 0;
    for (status, tasks) in &by_status {
        task_counts.insert(status.as_str().to_string(), tasks.len());
        total_tasks += tasks.len();
    }

    output(
        &SpecDetailOutput {
            spec: SpecOutput::from(&spec),
            task_counts,
            total_tasks,
        },
        json,
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct SpecListOutput {
    specs: Vec<SpecOutput>,
    total: usize,
}

impl CommandOutput for SpecListOutput {
    fn to_human(&self) -> String {
        if self.specs.is_empty() {
            return "No specs found.".to_string();
        }
        let mut table = list_table(&["id", "title", "status", "updated"]);
        for spec in &self.specs {
            table.add_row(vec![
                spec.id.clone(),
                truncate(&spec.title, 40),
                spec.status.clone(),
                spec.updated_at.clone(),
            ]);
        }
        format!("{} spec(s):\n{table}", self.total)
    }
}

pub async fn handle_list(status: Option<String>, json: bool) -> DomainResult<()> {
    let project = Project::load().await?;

    let status = status.as_deref().map(parse_status).transpose()?;
    let specs = project.store.list_specs(status).await?;

    output(
        &SpecListOutput {
            total: specs.len(),
            specs: specs.iter().map(SpecOutput::from).collect(),
        },
        json,
    );
    Ok(())
}
