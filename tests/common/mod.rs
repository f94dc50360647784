//! Shared fixtures for integration tests.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;

use specforge::domain::errors::DomainResult;
use specforge::domain::models::{Spec, Task};
use specforge::domain::ports::{AgentInvoker, AgentRequest, AgentResponse};
use specforge::services::{Store, StoreOptions};

/// Open an in-memory store with default options.
#[allow(dead_code)]
pub async fn memory_store() -> Arc<Store> {
    Arc::new(Store::open_in_memory(StoreOptions::default()).await.unwrap())
}

/// Open an in-memory store mirrored to a change log in `dir`.
#[allow(dead_code)]
pub async fn synced_store(dir: &Path) -> Arc<Store> {
    Arc::new(
        Store::open_in_memory(StoreOptions {
            changelog_path: Some(dir.join("specs.jsonl")),
            ..Default::default()
        })
        .await
        .unwrap(),
    )
}

/// Create a spec plus tasks in one call.
#[allow(dead_code)]
pub async fn seed_spec(store: &Store, spec_id: &str, tasks: &[Task]) {
    store.create_spec(&Spec::new(spec_id, spec_id)).await.unwrap();
    for task in tasks {
        store.create_task(task).await.unwrap();
    }
}

/// Initialize a git repository with one commit on `main`.
#[allow(dead_code)]
pub fn init_git_repo(path: &Path) {
    git(path, &["init", "-b", "main"]);
    git(path, &["config", "user.email", "tests@example.com"]);
    git(path, &["config", "user.name", "Tests"]);
    std::fs::write(path.join("README.md"), "# test repo\n").unwrap();
    git(path, &["add", "-A"]);
    git(path, &["commit", "-m", "initial commit"]);
}

#[allow(dead_code)]
pub fn git(path: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(path)
        .args(args)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Scripted agent invoker. The script receives each request and decides
/// the response; tests use the helpers below or supply a closure.
pub struct StubInvoker {
    script: Box<dyn Fn(&AgentRequest) -> AgentResponse + Send + Sync>,
}

impl StubInvoker {
    #[allow(dead_code)]
    pub fn new(
        script: impl Fn(&AgentRequest) -> AgentResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
        }
    }

    /// Succeed every stage by echoing the role's success phrase.
    #[allow(dead_code)]
    pub fn succeed_all() -> Self {
        Self::new(|request| AgentResponse {
            output: success_phrase_for(&request.prompt).to_string(),
            session_id: None,
            ok: true,
        })
    }

    /// Always report the coder as blocked; other roles never run when
    /// the first stage exhausts its budget.
    #[allow(dead_code)]
    pub fn block_coder() -> Self {
        Self::new(|request| {
            if prompt_role(&request.prompt) == "coder" {
                AgentResponse {
                    output: "BLOCKED: cannot find the schema".into(),
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
        })
    }
}

#[async_trait]
impl AgentInvoker for StubInvoker {
    async fn run(&self, request: AgentRequest) -> DomainResult<AgentResponse> {
        Ok((self.script)(&request))
    }
}

/// Extract the role name from a stage prompt header.
#[allow(dead_code)]
pub fn prompt_role(prompt: &str) -> &str {
    for role in ["coder", "reviewer", "tester", "qa"] {
        if prompt.contains(&format!("agent role: {role})")) {
            return role;
        }
    }
    "unknown"
}

#[allow(dead_code)]
pub fn success_phrase_for(prompt: &str) -> &'static str {
    match prompt_role(prompt) {
        "coder" => "IMPLEMENTATION COMPLETE",
        "reviewer" => "REVIEW PASSED",
        "tester" => "TESTS PASSED",
        "qa" => "QA PASSED",
        _ => "UNKNOWN STAGE",
    }
}
