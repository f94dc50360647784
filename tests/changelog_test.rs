//! Change-log integration tests: mirroring, round-trip, idempotency.

mod common;

use common::synced_store;
use specforge::domain::models::{ChangeType, EntityType, Spec, Task, TaskStatus};
use specforge::services::{fold_records, ChangeLog, Store, StoreOptions};

#[tokio::test]
async fn every_mutation_appends_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = synced_store(dir.path()).await;

    store.create_spec(&Spec::new("s1", "T1")).await.unwrap();
    store.create_task(&Task::new("t1", "s1", "task")).await.unwrap();
    let mut spec = store.get_spec("s1").await.unwrap().unwrap();
    spec.title = "T2".into();
    store.update_spec(&mut spec).await.unwrap();
    store.delete_task("t1").await.unwrap();

    let log = ChangeLog::open(dir.path().join("specs.jsonl")).unwrap();
    let records = log.read_all().unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].change_type, ChangeType::Create);
    assert_eq!(records[0].entity_type, EntityType::Spec);
    assert_eq!(records[1].entity_type, EntityType::Task);
    assert_eq!(records[2].change_type, ChangeType::Update);
    assert_eq!(records[3].change_type, ChangeType::Delete);
    assert!(records[3].data.is_none());

    // Fold: only s1 with the updated title survives.
    let state = fold_records(&records);
    assert_eq!(state.len(), 1);
    let spec_snapshot = &state[&(EntityType::Spec, "s1".to_string())];
    assert_eq!(spec_snapshot["title"], "T2");
}

#[tokio::test]
async fn import_reproduces_folded_state_in_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = synced_store(dir.path()).await;
        store.create_spec(&Spec::new("s1", "T1")).await.unwrap();
        store.create_task(&Task::new("t1", "s1", "task")).await.unwrap();
        let mut spec = store.get_spec("s1").await.unwrap().unwrap();
        spec.title = "T2".into();
        store.update_spec(&mut spec).await.unwrap();
        store.delete_task("t1").await.unwrap();
    }

    // Fresh store, same log file.
    let fresh = synced_store(dir.path()).await;
    fresh.import_changes().await.unwrap();

    let spec = fresh.get_spec("s1").await.unwrap().unwrap();
    assert_eq!(spec.title, "T2");
    assert!(fresh.get_task("t1", false).await.unwrap().is_none());
}

#[tokio::test]
async fn export_then_import_round_trips_full_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = synced_store(dir.path()).await;

    store.create_spec(&Spec::new("s1", "Spec One")).await.unwrap();
    store.create_spec(&Spec::new("s2", "Spec Two")).await.unwrap();
    store.create_task(&Task::new("t1", "s1", "first")).await.unwrap();
    store
        .create_task(&Task::new("t2", "s1", "second").with_dependency("t1"))
        .await
        .unwrap();
    store.update_task_status("t1", TaskStatus::Done).await.unwrap();

    let written = store.export_all().await.unwrap();
    assert_eq!(written, 4, "one create per live entity");

    let fresh = synced_store(dir.path()).await;
    fresh.import_changes().await.unwrap();

    let specs = fresh.list_specs(None).await.unwrap();
    assert_eq!(specs.len(), 2);
    let tasks = fresh.list_tasks(None, None).await.unwrap();
    assert_eq!(tasks.len(), 2);
    let t1 = fresh.get_task("t1", false).await.unwrap().unwrap();
    assert_eq!(t1.status, TaskStatus::Done);
    let t2 = fresh.get_task("t2", false).await.unwrap().unwrap();
    assert_eq!(t2.dependencies, vec!["t1".to_string()]);
}

#[tokio::test]
async fn import_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = synced_store(dir.path()).await;

    store.create_spec(&Spec::new("s1", "T1")).await.unwrap();
    store.create_task(&Task::new("t1", "s1", "task")).await.unwrap();

    let log = ChangeLog::open(dir.path().join("specs.jsonl")).unwrap();
    let lines_before = log.record_count().unwrap();

    store.import_changes().await.unwrap();
    store.import_changes().await.unwrap();

    // Replays do not grow the log and do not change the state.
    assert_eq!(log.record_count().unwrap(), lines_before);
    assert_eq!(store.list_specs(None).await.unwrap().len(), 1);
    assert_eq!(store.list_tasks(None, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn compact_collapses_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = synced_store(dir.path()).await;

    store.create_spec(&Spec::new("s1", "v1")).await.unwrap();
    for title in ["v2", "v3", "v4"] {
        let mut spec = store.get_spec("s1").await.unwrap().unwrap();
        spec.title = title.into();
        store.update_spec(&mut spec).await.unwrap();
    }

    let log = ChangeLog::open(dir.path().join("specs.jsonl")).unwrap();
    assert_eq!(log.record_count().unwrap(), 4);

    store.compact_changelog().await.unwrap();
    let records = log.read_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].change_type, ChangeType::Create);
    assert_eq!(records[0].data.as_ref().unwrap()["title"], "v4");
}

#[tokio::test]
async fn changelog_disabled_store_refuses_sync_operations() {
    let store = Store::open_in_memory(StoreOptions::default()).await.unwrap();
    assert!(store.export_all().await.is_err());
    assert!(store.import_changes().await.is_err());
}

#[tokio::test]
async fn sync_status_counts_by_kind() {
    let dir = tempfile::tempdir().unwrap();
    let store = synced_store(dir.path()).await;

    store.create_spec(&Spec::new("s1", "T")).await.unwrap();
    store.create_task(&Task::new("t1", "s1", "task")).await.unwrap();
    store.update_task_status("t1", TaskStatus::Done).await.unwrap();
    store.delete_task("t1").await.unwrap();

    let status = store.sync_status().await.unwrap();
    assert_eq!(status.total_records, 4);
    assert_eq!(status.spec_records, 1);
    assert_eq!(status.task_records, 3);
    assert_eq!(status.creates, 2);
    assert_eq!(status.updates, 1);
    assert_eq!(status.deletes, 1);
    assert!(status.file_size_bytes > 0);

    // A zero cursor sees the whole history, in file order.
    let all = store
        .get_changes_since(chrono::DateTime::<chrono::Utc>::MIN_UTC)
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].change_type, ChangeType::Create);
}
