//! Port traits at the seams between orchestration and the outside world.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::DomainResult;

/// A request to run the external coding-agent tool once.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Full prompt text passed as a single argument
    pub prompt: String,
    /// Working directory (usually a task workspace)
    pub cwd: PathBuf,
    /// Tool allow-list handed to the agent CLI
    pub allowed_tools: Vec<String>,
    /// Wall-clock budget for the invocation
    pub timeout: Duration,
    /// Optional model pin
    pub model: Option<String>,
}

/// Classified result of one agent invocation.
///
/// No semantic interpretation happens at this level; judging the output
/// against completion criteria is the pipeline's job.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// Extracted result text (JSON `result` field or raw stdout)
    pub output: String,
    /// Session id reported by the tool, when present
    pub session_id: Option<String>,
    /// Whether the process exited zero
    pub ok: bool,
}

/// Invokes the external coding-agent tool.
///
/// The production implementation shells out to the agent CLI; tests use
/// scripted stubs. Implementations return `Err` only for classified
/// infrastructure failures (missing executable, unusable invocation);
/// timeouts and non-zero exits come back as `ok = false` responses so
/// the pipeline can count them as iteration failures.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn run(&self, request: AgentRequest) -> DomainResult<AgentResponse>;
}
