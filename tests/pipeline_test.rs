//! Pipeline integration tests with a scripted agent invoker.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{memory_store, prompt_role, seed_spec, success_phrase_for, StubInvoker};
use specforge::application::{Pipeline, PipelineConfig, PipelineEnd};
use specforge::domain::models::{
    AgentRole, RalphLoopStatus, Task, TaskStatus,
};
use specforge::domain::ports::AgentResponse;
use specforge::services::Store;

fn pipeline(store: Arc<Store>, invoker: StubInvoker, root: &std::path::Path) -> Pipeline {
    Pipeline::new(
        store,
        Arc::new(invoker),
        root,
        PipelineConfig::default(),
    )
}

#[tokio::test]
async fn fast_path_runs_each_stage_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = memory_store().await;
    seed_spec(&store, "s", &[Task::new("t1", "s", "task")]).await;

    let pipe = pipeline(Arc::clone(&store), StubInvoker::succeed_all(), dir.path());
    let end = pipe.execute_task("t1", dir.path()).await.unwrap();
    assert_eq!(end, PipelineEnd::Completed);

    let task = store.get_task("t1", false).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.iteration, 4, "one iteration per stage");

    // Exactly four execution log rows, one per stage, in order.
    let logs = store.get_execution_logs("t1").await.unwrap();
    assert_eq!(logs.len(), 4);
    let actions: Vec<&str> = logs.iter().map(|l| l.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["Implementation", "Code Review", "Testing", "QA Validation"]
    );
    assert!(logs.iter().all(|l| l.success));

    // Every stage's loop completed.
    for role in AgentRole::all() {
        let lp = store.get_ralph_loop("t1", Some(role)).await.unwrap().unwrap();
        assert_eq!(lp.status, RalphLoopStatus::Completed);
        assert_eq!(lp.verification_results.len(), 1);
    }

    // No slots left allocated.
    assert!(store.list_active_agents().await.unwrap().is_empty());
}

#[tokio::test]
async fn blocked_coder_exhausts_stage_budget_and_resets_task() {
    let dir = tempfile::tempdir().unwrap();
    let store = memory_store().await;
    seed_spec(&store, "s", &[Task::new("t1", "s", "task")]).await;

    let pipe = pipeline(Arc::clone(&store), StubInvoker::block_coder(), dir.path());
    let end = pipe.execute_task("t1", dir.path()).await.unwrap();
    assert_eq!(
        end,
        PipelineEnd::StageFailed {
            stage: "Implementation"
        }
    );

    let task = store.get_task("t1", false).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Todo);
    assert_eq!(
        task.metadata["failure_stage"],
        serde_json::json!("Implementation")
    );
    assert!(task.metadata["failure_reason"]
        .as_str()
        .unwrap()
        .contains("BLOCKED"));

    // Three coder iterations, no later stages.
    let logs = store.get_execution_logs("t1").await.unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| l.agent_type == AgentRole::Coder));
    assert!(logs.iter().all(|l| !l.success));

    let lp = store
        .get_ralph_loop("t1", Some(AgentRole::Coder))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lp.status, RalphLoopStatus::Failed);
    assert_eq!(lp.verification_results.len(), 3);
    assert!(lp.verification_results.iter().all(|r| !r.verified));

    // The reviewer stage never registered a loop.
    assert!(store
        .get_ralph_loop("t1", Some(AgentRole::Reviewer))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn global_iteration_cap_bounds_total_work() {
    let dir = tempfile::tempdir().unwrap();
    let store = memory_store().await;
    seed_spec(&store, "s", &[Task::new("t1", "s", "task")]).await;

    // First three stages pass instantly; QA never passes. Its own
    // budget is 10, but the global cap of 10 leaves it only 7.
    let invoker = StubInvoker::new(|request| {
        if prompt_role(&request.prompt) == "qa" {
            AgentResponse {
                output: "QA FAILED: still broken".into(),
                session_id: None,
                ok: true,
            }
        } else {
            AgentResponse {
                output: success_phrase_for(&request.prompt).to_string(),
                session_id: None,
                ok: true,
            }
        }
    });

    let pipe = pipeline(Arc::clone(&store), invoker, dir.path());
    let end = pipe.execute_task("t1", dir.path()).await.unwrap();
    assert_eq!(
        end,
        PipelineEnd::StageFailed {
            stage: "QA Validation"
        }
    );

    let task = store.get_task("t1", false).await.unwrap().unwrap();
    assert_eq!(task.iteration, 10, "total never exceeds the global cap");

    let logs = store.get_execution_logs("t1").await.unwrap();
    assert_eq!(logs.len(), 10);

    let qa_loop = store
        .get_ralph_loop("t1", Some(AgentRole::Qa))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(qa_loop.verification_results.len(), 7);
    assert_eq!(qa_loop.status, RalphLoopStatus::Failed);
}

#[tokio::test]
async fn per_role_criteria_override_budget_and_promise() {
    use specforge::domain::models::{
        CompletionCriteria, TaskCompletionSpec, Verification,
    };

    let dir = tempfile::tempdir().unwrap();
    let store = memory_store().await;

    // The coder must emit a custom promise; the built-in phrase no
    // longer counts. Budget overridden from 3 to 2.
    let mut completion = TaskCompletionSpec {
        outcome: "done when the marker appears".into(),
        ..Default::default()
    };
    completion.set_criteria(
        AgentRole::Coder,
        CompletionCriteria {
            promise: "CUSTOM-MARKER-9000".into(),
            description: String::new(),
            verification: Verification::StringMatch,
            max_iterations: Some(2),
        },
    );
    seed_spec(
        &store,
        "s",
        &[Task::new("t1", "s", "task").with_completion_spec(completion)],
    )
    .await;

    let pipe = pipeline(Arc::clone(&store), StubInvoker::succeed_all(), dir.path());
    let end = pipe.execute_task("t1", dir.path()).await.unwrap();
    assert_eq!(
        end,
        PipelineEnd::StageFailed {
            stage: "Implementation"
        }
    );

    let lp = store
        .get_ralph_loop("t1", Some(AgentRole::Coder))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lp.max_iterations, 2);
    assert_eq!(lp.verification_results.len(), 2);
}

#[tokio::test]
async fn cancellation_aborts_between_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let store = memory_store().await;
    seed_spec(&store, "s", &[Task::new("t1", "s", "task")]).await;

    // The coder keeps failing; after the first invocation the loop is
    // cancelled from outside. The pipeline must notice at the next
    // iteration boundary and leave the task status as-is.
    let cancel_store = Arc::clone(&store);
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = Arc::clone(&calls);
    let invoker = StubInvoker::new(move |request| {
        if prompt_role(&request.prompt) == "coder"
            && calls_clone.fetch_add(1, Ordering::SeqCst) == 0
        {
            let store = Arc::clone(&cancel_store);
            tokio::spawn(async move {
                store.cancel_ralph_loop("t1", Some(AgentRole::Coder)).await.unwrap();
            });
        }
        AgentResponse {
            output: "ERROR: not yet".into(),
            session_id: None,
            ok: true,
        }
    });

    let pipe = pipeline(Arc::clone(&store), invoker, dir.path());

    // Give the cancel task a moment to land after the first iteration.
    let end = pipe.execute_task("t1", dir.path()).await.unwrap();

    match end {
        PipelineEnd::Cancelled { stage } => {
            assert_eq!(stage, "Implementation");
            let task = store.get_task("t1", false).await.unwrap().unwrap();
            // Status untouched by the abort path.
            assert_eq!(task.status, TaskStatus::Implementing);
            let lp = store
                .get_ralph_loop("t1", Some(AgentRole::Coder))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(lp.status, RalphLoopStatus::Cancelled);
        }
        PipelineEnd::StageFailed { .. } => {
            // The cancel raced past the last boundary; the budget path
            // is the legitimate alternative outcome.
        }
        PipelineEnd::Completed => panic!("pipeline cannot complete with a failing coder"),
    }
}

#[tokio::test]
async fn runner_errors_count_as_iteration_failures() {
    let dir = tempfile::tempdir().unwrap();
    let store = memory_store().await;
    seed_spec(&store, "s", &[Task::new("t1", "s", "task")]).await;

    // ok=false responses with unusable output must not abort the
    // pipeline; they consume iterations like any other failure.
    let invoker = StubInvoker::new(|_| AgentResponse {
        output: String::new(),
        session_id: None,
        ok: false,
    });

    let pipe = pipeline(Arc::clone(&store), invoker, dir.path());
    let end = pipe.execute_task("t1", dir.path()).await.unwrap();
    assert_eq!(
        end,
        PipelineEnd::StageFailed {
            stage: "Implementation"
        }
    );
    let logs = store.get_execution_logs("t1").await.unwrap();
    assert_eq!(logs.len(), 3);
}
