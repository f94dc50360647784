//! Change-log sync commands.

use serde::Serialize;

use crate::application::Project;
use crate::cli::output::{output, CommandOutput};
use crate::domain::errors::DomainResult;
use crate::services::SyncStatus;

#[derive(Debug, Serialize)]
struct CountOutput {
    action: &'static str,
    records: usize,
}

impl CommandOutput for CountOutput {
    fn to_human(&self) -> String {
        match self.action {
            "export" => format!("Exported {} record(s)", self.records),
            "import" => format!("Imported {} entit(ies)", self.records),
            "compact" => format!("Compacted to {} record(s)", self.records),
            _ => format!("{} record(s)", self.records),
        }
    }
}

pub async fn handle_export(json: bool) -> DomainResult<()> {
    let project = Project::load().await?;
    let records = project.store.export_all().await?;
    output(
        &CountOutput {
            action: "export",
            records,
        },
        json,
    );
    Ok(())
}

pub async fn handle_import(json: bool) -> DomainResult<()> {
    let project = Project::load().await?;
    let records = project.store.import_changes().await?;
    output(
        &CountOutput {
            action: "import",
            records,
        },
        json,
    );
    Ok(())
}

pub async fn handle_compact(json: bool) -> DomainResult<()> {
    let project = Project::load().await?;
    let records = project.store.compact_changelog().await?;
    output(
        &CountOutput {
            action: "compact",
            records,
        },
        json,
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct SyncStatusOutput {
    #[serde(flatten)]
    status: SyncStatus,
}

impl CommandOutput for SyncStatusOutput {
    fn to_human(&self) -> String {
        let s = &self.status;
        format!(
            "Change log: {}\n\
             Records: {} ({} spec, {} task)\n\
             Changes: {} create, {} update, {} delete\n\
             File size: {} bytes",
            s.path,
            s.total_records,
            s.spec_records,
            s.task_records,
            s.creates,
            s.updates,
            s.deletes,
            s.file_size_bytes,
        )
    }
}

pub async fn handle_status(json: bool) -> DomainResult<()> {
    let project = Project::load().await?;
    let status = project.store.sync_status().await?;
    output(&SyncStatusOutput { status }, json);
    Ok(())
}
