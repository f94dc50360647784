//! Command-line interface.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Spec-driven development orchestrator.
#[derive(Parser, Debug)]
#[command(name = "specforge", version, about)]
pub struct Cli {
    /// Emit a JSON object instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a project in the current (or given) directory
    Init {
        /// Project root
        #[arg(long)]
        path: Option<PathBuf>,
        /// Refresh template files in an existing project
        #[arg(long)]
        update: bool,
    },
    /// Summarize specs, tasks, agents, and loops
    Status,

    /// Create a spec
    SpecCreate {
        /// Stable kebab-case id
        id: String,
        /// Title (defaults to the id)
        #[arg(long)]
        title: Option<String>,
        /// Source document kind (brd or prd)
        #[arg(long)]
        source_type: Option<String>,
        /// Initial status
        #[arg(long)]
        status: Option<String>,
    },
    /// Update a spec's status or title
    SpecUpdate {
        id: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Show one spec with its task rollup
    SpecGet { id: String },
    /// List specs
    ListSpecs {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },

    /// Create a task
    TaskCreate(TaskCreateArgs),
    /// Create a follow-up task depending on its parent
    TaskFollowup(TaskFollowupArgs),
    /// Set a task's status
    TaskUpdate { id: String, status: String },
    /// List tasks
    ListTasks {
        /// Filter by spec
        #[arg(long)]
        spec: Option<String>,
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },

    /// Execute ready tasks through the agent pipeline
    Execute {
        /// Limit to one spec
        #[arg(long)]
        spec: Option<String>,
        /// Run a single task
        #[arg(long)]
        task: Option<String>,
        /// Worker parallelism
        #[arg(long, default_value_t = 6)]
        max_parallel: usize,
    },

    /// Register an agent slot for a task
    AgentStart {
        task_id: String,
        /// Agent role
        #[arg(long = "type", default_value = "coder")]
        agent_type: String,
        /// Workspace path
        #[arg(long)]
        worktree: Option<String>,
        /// OS pid of the running agent
        #[arg(long)]
        pid: Option<u32>,
    },
    /// Release an agent slot by task or slot number
    AgentStop {
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        slot: Option<u32>,
    },
    /// List active agents
    ListAgents,

    /// Show Ralph verification loops
    RalphStatus {
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Cancel an active Ralph loop
    RalphCancel {
        task_id: String,
        #[arg(long)]
        agent_type: Option<String>,
    },

    /// Rewrite the change log from current state
    SyncExport,
    /// Replay the change log into the store
    SyncImport,
    /// Compact the change log
    SyncCompact,
    /// Show change-log statistics
    SyncStatus,

    /// Create a task workspace
    WorktreeCreate {
        task_id: String,
        /// Base branch to derive from (defaults to config)
        #[arg(long)]
        base: Option<String>,
    },
    /// Remove a task workspace
    WorktreeRemove {
        task_id: String,
        #[arg(long)]
        force: bool,
    },
    /// List task workspaces
    WorktreeList,
    /// Commit all changes in a task workspace
    WorktreeCommit { task_id: String, message: String },
    /// Merge a task branch into the base branch
    MergeTask {
        task_id: String,
        /// Target branch (defaults to config)
        #[arg(long)]
        target: Option<String>,
        /// Remove the workspace and branch after a successful merge
        #[arg(long)]
        cleanup: bool,
    },
}

/// Per-role completion options shared by task-create and task-followup.
#[derive(Args, Debug, Default, Clone)]
pub struct CompletionOptions {
    /// Prose statement of the desired outcome
    #[arg(long)]
    pub outcome: Option<String>,
    /// Acceptance criterion (repeatable)
    #[arg(long = "acceptance-criteria")]
    pub acceptance_criteria: Vec<String>,
    /// YAML or JSON completion-spec file
    #[arg(long)]
    pub completion_file: Option<PathBuf>,

    #[arg(long)]
    pub coder_promise: Option<String>,
    #[arg(long)]
    pub coder_verification: Option<String>,
    #[arg(long)]
    pub coder_command: Option<String>,

    #[arg(long)]
    pub reviewer_promise: Option<String>,
    #[arg(long)]
    pub reviewer_verification: Option<String>,
    #[arg(long)]
    pub reviewer_command: Option<String>,

    #[arg(long)]
    pub tester_promise: Option<String>,
    #[arg(long)]
    pub tester_verification: Option<String>,
    #[arg(long)]
    pub tester_command: Option<String>,

    #[arg(long)]
    pub qa_promise: Option<String>,
    #[arg(long)]
    pub qa_verification: Option<String>,
    #[arg(long)]
    pub qa_command: Option<String>,
}

#[derive(Args, Debug)]
pub struct TaskCreateArgs {
    pub id: String,
    pub spec_id: String,
    pub title: String,
    #[arg(long)]
    pub description: Option<String>,
    /// Priority: 1 (highest) to 3
    #[arg(long, default_value_t = 2)]
    pub priority: i64,
    /// Comma-separated dependency task ids
    #[arg(long, value_delimiter = ',')]
    pub dependencies: Vec<String>,
    /// Agent role assigned to the task
    #[arg(long)]
    pub assignee: Option<String>,
    #[command(flatten)]
    pub completion: CompletionOptions,
}

#[derive(Args, Debug)]
pub struct TaskFollowupArgs {
    pub id: String,
    pub spec_id: String,
    pub title: String,
    /// Parent task this follow-up depends on
    #[arg(long)]
    pub parent: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, default_value_t = 2)]
    pub priority: i64,
    /// Extra dependencies beyond the parent
    #[arg(long, value_delimiter = ',')]
    pub dependencies: Vec<String>,
    #[arg(long)]
    pub assignee: Option<String>,
    #[command(flatten)]
    pub completion: CompletionOptions,
}
