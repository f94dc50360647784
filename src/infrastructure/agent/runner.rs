//! The agent runner: invoke the external coding-agent CLI.
//!
//! Spawns the configured executable in non-interactive mode with a
//! structured-output request and a tool allow-list, captures stdout and
//! stderr, enforces the wall-clock timeout, and classifies the result.
//! No semantic interpretation happens here.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{AgentInvoker, AgentRequest, AgentResponse};

/// Shells out to the coding-agent CLI (`claude` by default).
pub struct CliAgentRunner {
    command: String,
}

impl CliAgentRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl AgentInvoker for CliAgentRunner {
    #[instrument(skip(self, request), fields(cwd = %request.cwd.display()))]
    async fn run(&self, request: AgentRequest) -> DomainResult<AgentResponse> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("-p")
            .arg(&request.prompt)
            .arg("--output-format")
            .arg("json")
            .arg("--allowedTools")
            .arg(request.allowed_tools.join(","))
            .current_dir(&request.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref model) = request.model {
            cmd.arg("--model").arg(model);
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DomainError::AgentNotInstalled(self.command.clone())
            } else {
                DomainError::AgentBadOutput(format!("failed to spawn agent: {e}"))
            }
        })?;

        let timeout_secs = request.timeout.as_secs();
        let output = match timeout(request.timeout, child.wait_with_output()).await {
            Ok(result) => {
                result.map_err(|e| DomainError::AgentBadOutput(format!("agent io: {e}")))?
            }
            Err(_elapsed) => {
                // Dropping the in-flight future kills the child
                // (kill_on_drop); report the timeout as a failed run so
                // the pipeline counts it as an iteration failure.
                warn!(timeout_secs, "Agent execution timed out");
                return Ok(AgentResponse {
                    output: format!("TIMEOUT: agent execution exceeded {timeout_secs}s"),
                    session_id: None,
                    ok: false,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let ok = output.status.success();

        let (mut text, session_id) = extract_result(&stdout);
        if !ok && !stderr.trim().is_empty() {
            text.push_str("\n\nSTDERR:\n");
            text.push_str(&stderr);
        }

        debug!(ok, output_len = text.len(), "Agent run finished");
        Ok(AgentResponse {
            output: text,
            session_id,
            ok,
        })
    }
}

/// Parse stdout as the agent's JSON envelope, falling back to the raw
/// text when it is not JSON.
fn extract_result(stdout: &str) -> (String, Option<String>) {
    match serde_json::from_str::<serde_json::Value>(stdout) {
        Ok(value) => {
            let result = value
                .get("result")
                .and_then(|r| r.as_str())
                .map_or_else(|| stdout.to_string(), String::from);
            let session_id = value
                .get("session_id")
                .and_then(|s| s.as_str())
                .map(String::from);
            (result, session_id)
        }
        Err(_) => (stdout.to_string(), None),
    }
}
