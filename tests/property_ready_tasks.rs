//! Property test: `get_ready_tasks` returns exactly the todo tasks
//! whose dependencies are all done, ordered by priority then age.

use proptest::prelude::*;

use specforge::domain::models::{Task, TaskPriority, TaskStatus};
use specforge::services::{Store, StoreOptions};

#[derive(Debug, Clone)]
struct GeneratedTask {
    status: TaskStatus,
    priority: TaskPriority,
    /// Bitmask over earlier task indices, keeping the graph acyclic.
    deps_mask: u8,
}

fn status_strategy() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Todo),
        Just(TaskStatus::Implementing),
        Just(TaskStatus::Testing),
        Just(TaskStatus::Reviewing),
        Just(TaskStatus::Done),
    ]
}

fn priority_strategy() -> impl Strategy<Value = TaskPriority> {
    prop_oneof![
        Just(TaskPriority::High),
        Just(TaskPriority::Medium),
        Just(TaskPriority::Low),
    ]
}

fn tasks_strategy() -> impl Strategy<Value = Vec<GeneratedTask>> {
    prop::collection::vec(
        (status_strategy(), priority_strategy(), any::<u8>()).prop_map(
            |(status, priority, deps_mask)| GeneratedTask {
                status,
                priority,
                deps_mask,
            },
        ),
        0..8,
    )
}

fn task_id(index: usize) -> String {
    format!("task-{index:02}")
}

/// The naive model of the ready-set query.
fn expected_ready(tasks: &[GeneratedTask]) -> Vec<String> {
    let mut ready: Vec<(usize, &GeneratedTask)> = tasks
        .iter()
        .enumerate()
        .filter(|(i, t)| {
            t.status == TaskStatus::Todo
                && (0..*i)
                    .filter(|j| t.deps_mask & (1 << j) != 0)
                    .all(|j| tasks[j].status == TaskStatus::Done)
        })
        .collect();
    // Priority ascending; created_at (creation order) breaks ties.
    ready.sort_by_key(|(i, t)| (t.priority.as_i64(), *i));
    ready.into_iter().map(|(i, _)| task_id(i)).collect()
}

async fn observed_ready(tasks: &[GeneratedTask]) -> Vec<String> {
    let store = Store::open_in_memory(StoreOptions::default()).await.unwrap();
    store
        .create_spec(&specforge::domain::models::Spec::new("s", "S"))
        .await
        .unwrap();

    let base = chrono::Utc::now();
    for (i, generated) in tasks.iter().enumerate() {
        let mut task = Task::new(task_id(i), "s", format!("Task {i}"))
            .with_priority(generated.priority);
        task.status = generated.status;
        // Deterministic, strictly increasing creation times.
        task.created_at = base + chrono::Duration::seconds(i as i64);
        task.updated_at = task.created_at;
        for j in 0..i {
            if generated.deps_mask & (1 << j) != 0 {
                task = task.with_dependency(task_id(j));
            }
        }
        store.create_task(&task).await.unwrap();
    }

    store
        .get_ready_tasks(Some("s"))
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ready_query_matches_naive_model(tasks in tasks_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let observed = runtime.block_on(observed_ready(&tasks));
        let expected = expected_ready(&tasks);
        prop_assert_eq!(observed, expected);
    }
}
