//! Store integration tests: ready-set semantics, ordering, and
//! registry invariants.

mod common;

use common::{memory_store, seed_spec};
use specforge::domain::models::{AgentRole, Task, TaskPriority, TaskStatus};

#[tokio::test]
async fn ready_set_respects_dependencies() {
    let store = memory_store().await;

    // A (no deps, prio 2), B (deps=[A], prio 1), C (deps=[A], prio 3).
    seed_spec(
        &store,
        "s",
        &[
            Task::new("A", "s", "Task A").with_priority(TaskPriority::Medium),
            Task::new("B", "s", "Task B")
                .with_priority(TaskPriority::High)
                .with_dependency("A"),
            Task::new("C", "s", "Task C")
                .with_priority(TaskPriority::Low)
                .with_dependency("A"),
        ],
    )
    .await;

    let ready = store.get_ready_tasks(Some("s")).await.unwrap();
    let ids: Vec<&str> = ready.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["A"]);

    store.update_task_status("A", TaskStatus::Done).await.unwrap();

    let ready = store.get_ready_tasks(Some("s")).await.unwrap();
    let ids: Vec<&str> = ready.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["B", "C"], "priority ascending after A completes");
}

#[tokio::test]
async fn ready_set_excludes_non_todo_and_dangling_deps() {
    let store = memory_store().await;
    seed_spec(
        &store,
        "s",
        &[
            Task::new("A", "s", "A"),
            Task::new("B", "s", "B").with_dependency("ghost"),
        ],
    )
    .await;

    store
        .update_task_status("A", TaskStatus::Implementing)
        .await
        .unwrap();

    // A is in flight; B's dependency points at nothing and must keep it
    // blocked rather than releasing it.
    let ready = store.get_ready_tasks(Some("s")).await.unwrap();
    assert!(ready.is_empty());
}

#[tokio::test]
async fn list_tasks_orders_by_priority_then_age() {
    let store = memory_store().await;

    let base = chrono::Utc::now();
    let mut older_low = Task::new("low-old", "s", "t").with_priority(TaskPriority::Low);
    older_low.created_at = base - chrono::Duration::minutes(10);
    let mut newer_high = Task::new("high-new", "s", "t").with_priority(TaskPriority::High);
    newer_high.created_at = base - chrono::Duration::minutes(1);
    let mut older_high = Task::new("high-old", "s", "t").with_priority(TaskPriority::High);
    older_high.created_at = base - chrono::Duration::minutes(5);

    seed_spec(&store, "s", &[older_low, newer_high, older_high]).await;

    let tasks = store.list_tasks(Some("s"), None).await.unwrap();
    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["high-old", "high-new", "low-old"]);
}

#[tokio::test]
async fn list_specs_orders_by_recent_update() {
    use specforge::domain::models::Spec;

    let store = memory_store().await;
    for id in ["first", "second", "third"] {
        store.create_spec(&Spec::new(id, id)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
    }

    // Touching "first" moves it to the front.
    let mut first = store.get_spec("first").await.unwrap().unwrap();
    store.update_spec(&mut first).await.unwrap();

    let specs = store.list_specs(None).await.unwrap();
    let ids: Vec<&str> = specs.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["first", "third", "second"]);
}

#[tokio::test]
async fn is_task_blocked_tracks_dependency_status() {
    let store = memory_store().await;
    seed_spec(
        &store,
        "s",
        &[
            Task::new("A", "s", "A"),
            Task::new("B", "s", "B").with_dependency("A"),
        ],
    )
    .await;

    let b = store.get_task("B", false).await.unwrap().unwrap();
    assert!(store.is_task_blocked(&b).await.unwrap());

    store.update_task_status("A", TaskStatus::Done).await.unwrap();
    assert!(!store.is_task_blocked(&b).await.unwrap());
}

#[tokio::test]
async fn tasks_group_by_status() {
    let store = memory_store().await;
    seed_spec(
        &store,
        "s",
        &[
            Task::new("a", "s", "A"),
            Task::new("b", "s", "B"),
            Task::new("c", "s", "C"),
        ],
    )
    .await;
    store.update_task_status("a", TaskStatus::Done).await.unwrap();
    store
        .update_task_status("b", TaskStatus::Implementing)
        .await
        .unwrap();

    let grouped = store.get_tasks_by_status("s").await.unwrap();
    assert_eq!(grouped[&TaskStatus::Done].len(), 1);
    assert_eq!(grouped[&TaskStatus::Implementing].len(), 1);
    assert_eq!(grouped[&TaskStatus::Todo].len(), 1);
    assert!(!grouped.contains_key(&TaskStatus::Testing));
}

#[tokio::test]
async fn update_rechecks_dependency_cycles() {
    let store = memory_store().await;
    seed_spec(
        &store,
        "s",
        &[
            Task::new("a", "s", "A"),
            Task::new("b", "s", "B").with_dependency("a"),
        ],
    )
    .await;

    // Introducing a -> b closes the loop and must be rejected.
    let mut a = store.get_task("a", false).await.unwrap().unwrap();
    a.dependencies.push("b".to_string());
    let err = store.update_task(&mut a).await.unwrap_err();
    assert!(matches!(
        err,
        specforge::domain::errors::DomainError::InvalidArgument(_)
    ));

    // The stored row is unchanged.
    let a = store.get_task("a", false).await.unwrap().unwrap();
    assert!(a.dependencies.is_empty());
}

#[tokio::test]
async fn execution_log_truncates_oversized_output() {
    use specforge::domain::models::{AgentRole as Role, LOG_OUTPUT_MAX_CHARS};

    let store = memory_store().await;
    seed_spec(&store, "s", &[Task::new("t1", "s", "t")]).await;

    let huge = "x".repeat(LOG_OUTPUT_MAX_CHARS * 2);
    store
        .log_execution("t1", Role::Coder, "Implementation", &huge, true, 5)
        .await
        .unwrap();

    let logs = store.get_execution_logs("t1").await.unwrap();
    assert!(logs[0].output.chars().count() < huge.chars().count());
    assert!(logs[0].output.ends_with("[truncated]"));
}

#[tokio::test]
async fn cascade_delete_removes_tasks() {
    let store = memory_store().await;
    seed_spec(&store, "s", &[Task::new("A", "s", "A"), Task::new("B", "s", "B")]).await;

    store.delete_spec("s").await.unwrap();
    assert!(store.get_task("A", false).await.unwrap().is_none());
    assert!(store.get_task("B", false).await.unwrap().is_none());
}

#[tokio::test]
async fn tasks_updated_since_acts_as_cursor() {
    let store = memory_store().await;
    seed_spec(&store, "s", &[Task::new("A", "s", "A"), Task::new("B", "s", "B")]).await;

    let cursor = chrono::Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store
        .update_task_status("B", TaskStatus::Implementing)
        .await
        .unwrap();

    let updated = store.get_tasks_updated_since("s", cursor).await.unwrap();
    let ids: Vec<&str> = updated.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["B"]);
}

#[tokio::test]
async fn agent_slots_are_unique_and_bounded() {
    let store = memory_store().await;
    let tasks: Vec<Task> = (0..7).map(|i| Task::new(format!("t{i}"), "s", "t")).collect();
    seed_spec(&store, "s", &tasks).await;

    // Fill all six default slots.
    for i in 0..6 {
        store
            .register_agent(&format!("t{i}"), AgentRole::Coder, None, None)
            .await
            .unwrap();
    }

    let agents = store.list_active_agents().await.unwrap();
    let mut slots: Vec<u32> = agents.iter().map(|a| a.slot).collect();
    slots.sort_unstable();
    assert_eq!(slots, vec![1, 2, 3, 4, 5, 6]);

    let err = store
        .register_agent("t6", AgentRole::Coder, None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        specforge::domain::errors::DomainError::SlotsExhausted(6)
    ));
}

#[tokio::test]
async fn cleanup_removes_only_dead_pids() {
    let store = memory_store().await;
    seed_spec(
        &store,
        "s",
        &[
            Task::new("alive", "s", "t"),
            Task::new("dead", "s", "t"),
            Task::new("pidless", "s", "t"),
        ],
    )
    .await;

    let own_pid = std::process::id();
    store
        .register_agent("alive", AgentRole::Coder, Some(own_pid), None)
        .await
        .unwrap();
    // Max pid on Linux is far below this, so the probe sees ESRCH.
    store
        .register_agent("dead", AgentRole::Coder, Some(999_999_999), None)
        .await
        .unwrap();
    store
        .register_agent("pidless", AgentRole::Coder, None, None)
        .await
        .unwrap();

    let removed = store.cleanup_stale_agents().await.unwrap();
    assert_eq!(removed, 1);

    let remaining: Vec<String> = store
        .list_active_agents()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.task_id)
        .collect();
    assert!(remaining.contains(&"alive".to_string()));
    assert!(remaining.contains(&"pidless".to_string()));
    assert!(!remaining.contains(&"dead".to_string()));
}
