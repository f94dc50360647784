//! Append-only, git-friendly change log.
//!
//! Every spec/task mutation in the store is mirrored here as one JSONL
//! line. The file is the durable, diffable record; replaying it into an
//! empty store reproduces the live spec/task set.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ChangeRecord, ChangeType, EntityType};

/// Handle to the JSONL change-log file. Owned by the store; observers
/// only ever read.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    path: PathBuf,
}

impl ChangeLog {
    /// Open (creating if missing) the change log at the given path.
    pub fn open(path: impl Into<PathBuf>) -> DomainResult<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            File::create(&path)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, newline-terminated. Errors propagate so the
    /// caller can roll back the surrounding transaction.
    pub fn append(&self, record: &ChangeRecord) -> DomainResult<()> {
        let line = record.to_jsonl()?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Read every record in file order. Blank lines are skipped; an
    /// unparseable record is a fatal import error.
    pub fn read_all(&self) -> DomainResult<Vec<ChangeRecord>> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = ChangeRecord::from_jsonl(trimmed).map_err(|e| {
                DomainError::ChangeLogImport(format!("line {}: {e}", line_no + 1))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Records with `timestamp >= since`, in file order.
    pub fn changes_since(&self, since: DateTime<Utc>) -> DomainResult<Vec<ChangeRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.timestamp >= since)
            .collect())
    }

    /// Truncate the file. Used by export/compact before rewriting.
    pub fn clear(&self) -> DomainResult<()> {
        File::create(&self.path)?;
        Ok(())
    }

    /// Number of records currently in the file.
    pub fn record_count(&self) -> DomainResult<usize> {
        Ok(self.read_all()?.len())
    }

    /// File size in bytes, for status reporting.
    pub fn file_size(&self) -> DomainResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

/// Left-fold records into final snapshots keyed by (entity, id).
///
/// Create and update both overwrite the snapshot; delete removes the
/// key. The replay sort key is file position, not timestamp.
pub fn fold_records(
    records: &[ChangeRecord],
) -> HashMap<(EntityType, String), serde_json::Value> {
    let mut state: HashMap<(EntityType, String), serde_json::Value> = HashMap::new();
    for record in records {
        let key = (record.entity_type, record.entity_id.clone());
        match record.change_type {
            ChangeType::Create | ChangeType::Update => {
                if let Some(ref data) = record.data {
                    state.insert(key, data.clone());
                }
            }
            ChangeType::Delete => {
                state.remove(&key);
            }
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        entity_type: EntityType,
        id: &str,
        change_type: ChangeType,
        data: Option<serde_json::Value>,
    ) -> ChangeRecord {
        ChangeRecord {
            timestamp: Utc::now(),
            entity_type,
            entity_id: id.to_string(),
            change_type,
            data,
        }
    }

    #[test]
    fn test_append_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChangeLog::open(dir.path().join("specs.jsonl")).unwrap();

        let r1 = record(
            EntityType::Spec,
            "s1",
            ChangeType::Create,
            Some(serde_json::json!({"id": "s1"})),
        );
        let r2 = record(EntityType::Spec, "s1", ChangeType::Delete, None);
        log.append(&r1).unwrap();
        log.append(&r2).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], r1);
        assert_eq!(records[1], r2);
    }

    #[test]
    fn test_fold_applies_in_file_order() {
        let records = vec![
            record(
                EntityType::Spec,
                "s1",
                ChangeType::Create,
                Some(serde_json::json!({"title": "T1"})),
            ),
            record(
                EntityType::Task,
                "t1",
                ChangeType::Create,
                Some(serde_json::json!({"title": "task"})),
            ),
            record(
                EntityType::Spec,
                "s1",
                ChangeType::Update,
                Some(serde_json::json!({"title": "T2"})),
            ),
            record(EntityType::Task, "t1", ChangeType::Delete, None),
        ];
        let state = fold_records(&records);
        assert_eq!(state.len(), 1);
        let spec = &state[&(EntityType::Spec, "s1".to_string())];
        assert_eq!(spec["title"], "T2");
    }

    #[test]
    fn test_unparseable_line_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("specs.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        let log = ChangeLog::open(&path).unwrap();
        assert!(matches!(
            log.read_all(),
            Err(DomainError::ChangeLogImport(_))
        ));
    }

    #[test]
    fn test_changes_since_filters_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChangeLog::open(dir.path().join("specs.jsonl")).unwrap();

        let mut old = record(EntityType::Spec, "s1", ChangeType::Create, Some(serde_json::json!({})));
        old.timestamp = Utc::now() - chrono::Duration::hours(2);
        let new = record(EntityType::Spec, "s2", ChangeType::Create, Some(serde_json::json!({})));
        log.append(&old).unwrap();
        log.append(&new).unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let recent = log.changes_since(cutoff).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].entity_id, "s2");
    }

    #[test]
    fn test_clear_empties_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChangeLog::open(dir.path().join("specs.jsonl")).unwrap();
        log.append(&record(
            EntityType::Spec,
            "s1",
            ChangeType::Create,
            Some(serde_json::json!({})),
        ))
        .unwrap();
        log.clear().unwrap();
        assert_eq!(log.record_count().unwrap(), 0);
    }
}
