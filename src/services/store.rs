//! The store: sole authority over persistent state.
//!
//! All records are owned here; other components hold snapshots and
//! mutate through these operations. Writes are serialized by a single
//! writer lock and run as transactions; every spec/task mutation is
//! mirrored to the change log before the transaction commits, so an
//! append failure rolls the write back.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::adapters::sqlite::{
    agent_repository, connection, log_repository, ralph_repository, spec_repository,
    task_repository, Migrator,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActiveAgent, AgentRole, ChangeRecord, ChangeType, EntityType, ExecutionLog, RalphLoop,
    RalphLoopStatus, Spec, SpecStatus, Task, TaskStatus, VerificationRecord,
};

use super::changelog::{fold_records, ChangeLog};

/// Default size of the agent slot pool.
pub const DEFAULT_MAX_SLOTS: u32 = 6;

/// Options controlling how a store is opened.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Size of the agent slot pool
    pub max_slots: u32,
    /// Mirror spec/task mutations to this JSONL file when set
    pub changelog_path: Option<PathBuf>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_slots: DEFAULT_MAX_SLOTS,
            changelog_path: None,
        }
    }
}

/// Aggregate counts for `sync-status`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncStatus {
    pub total_records: usize,
    pub spec_records: usize,
    pub task_records: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub file_size_bytes: u64,
    pub path: String,
}

/// Durable persistence for specs, tasks, execution logs, agent slots,
/// and Ralph loops.
#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
    writer: Mutex<()>,
    changelog: Option<ChangeLog>,
    max_slots: u32,
}

impl Store {
    /// Open the store at the given path, applying pending migrations.
    pub async fn open(db_path: &Path, options: StoreOptions) -> DomainResult<Self> {
        let pool = connection::create_pool(db_path)
            .await
            .map_err(|e| DomainError::Database(e.to_string()))?;
        Self::finish_open(pool, options).await
    }

    /// In-memory store for tests.
    pub async fn open_in_memory(options: StoreOptions) -> DomainResult<Self> {
        let pool = connection::create_memory_pool()
            .await
            .map_err(|e| DomainError::Database(e.to_string()))?;
        Self::finish_open(pool, options).await
    }

    async fn finish_open(pool: SqlitePool, options: StoreOptions) -> DomainResult<Self> {
        Migrator::new(pool.clone()).run().await?;
        let changelog = options
            .changelog_path
            .map(ChangeLog::open)
            .transpose()?;
        Ok(Self {
            pool,
            writer: Mutex::new(()),
            changelog,
            max_slots: options.max_slots,
        })
    }

    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    pub fn changelog(&self) -> Option<&ChangeLog> {
        self.changelog.as_ref()
    }

    fn mirror(&self, record: &ChangeRecord) -> DomainResult<()> {
        if let Some(ref changelog) = self.changelog {
            changelog.append(record)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Specs
    // ------------------------------------------------------------------

    #[instrument(skip(self, spec), fields(spec_id = %spec.id))]
    pub async fn create_spec(&self, spec: &Spec) -> DomainResult<()> {
        spec.validate().map_err(DomainError::InvalidArgument)?;
        let _w = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        spec_repository::insert(&mut tx, spec).await?;
        self.mirror(&ChangeRecord::upsert(
            EntityType::Spec,
            &spec.id,
            ChangeType::Create,
            serde_json::to_value(spec)?,
        ))?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_spec(&self, spec_id: &str) -> DomainResult<Option<Spec>> {
        let mut conn = self.pool.acquire().await?;
        spec_repository::get(&mut conn, spec_id).await
    }

    /// Specs ordered by `updated_at` descending.
    pub async fn list_specs(&self, status: Option<SpecStatus>) -> DomainResult<Vec<Spec>> {
        let mut conn = self.pool.acquire().await?;
        spec_repository::list(&mut conn, status).await
    }

    #[instrument(skip(self, spec), fields(spec_id = %spec.id))]
    pub async fn update_spec(&self, spec: &mut Spec) -> DomainResult<()> {
        spec.touch();
        spec.validate().map_err(DomainError::InvalidArgument)?;
        let _w = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        spec_repository::update(&mut tx, spec).await?;
        self.mirror(&ChangeRecord::upsert(
            EntityType::Spec,
            &spec.id,
            ChangeType::Update,
            serde_json::to_value(&*spec)?,
        ))?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a spec and, by cascade, its tasks. One delete record is
    /// emitted per cascaded task so replays stay faithful.
    #[instrument(skip(self))]
    pub async fn delete_spec(&self, spec_id: &str) -> DomainResult<()> {
        let _w = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let tasks = task_repository::list(&mut tx, Some(spec_id), None).await?;
        spec_repository::delete(&mut tx, spec_id).await?;
        for task in &tasks {
            self.mirror(&ChangeRecord::delete(EntityType::Task, &task.id))?;
        }
        self.mirror(&ChangeRecord::delete(EntityType::Spec, spec_id))?;
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Persist a task and, atomically, its completion spec if present.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn create_task(&self, task: &Task) -> DomainResult<()> {
        task.validate().map_err(DomainError::InvalidArgument)?;
        if let Some(ref completion) = task.completion_spec {
            let problems = completion.validate();
            if !problems.is_empty() {
                return Err(DomainError::InvalidArgument(problems.join("; ")));
            }
        }

        let _w = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        if spec_repository::get(&mut tx, &task.spec_id).await?.is_none() {
            return Err(DomainError::spec_not_found(&task.spec_id));
        }
        if task_repository::get(&mut tx, &task.id, false).await?.is_some() {
            return Err(DomainError::DuplicateId(task.id.clone()));
        }
        self.check_acyclic(&mut tx, task).await?;

        task_repository::insert(&mut tx, task).await?;
        self.mirror(&ChangeRecord::upsert(
            EntityType::Task,
            &task.id,
            ChangeType::Create,
            serde_json::to_value(task)?,
        ))?;
        tx.commit().await?;
        Ok(())
    }

    /// Fetch a task. `load_completion = false` skips expanding the
    /// completion spec for bulk paths.
    pub async fn get_task(&self, task_id: &str, load_completion: bool) -> DomainResult<Option<Task>> {
        let mut conn = self.pool.acquire().await?;
        task_repository::get(&mut conn, task_id, load_completion).await
    }

    /// Tasks ordered by priority ascending, then creation time.
    pub async fn list_tasks(
        &self,
        spec_id: Option<&str>,
        status: Option<TaskStatus>,
    ) -> DomainResult<Vec<Task>> {
        let mut conn = self.pool.acquire().await?;
        task_repository::list(&mut conn, spec_id, status).await
    }

    /// All todo tasks whose dependencies are all done, in list order.
    pub async fn get_ready_tasks(&self, spec_id: Option<&str>) -> DomainResult<Vec<Task>> {
        let mut conn = self.pool.acquire().await?;
        task_repository::ready(&mut conn, spec_id).await
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn update_task(&self, task: &mut Task) -> DomainResult<()> {
        task.touch();
        task.validate().map_err(DomainError::InvalidArgument)?;
        let _w = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        self.check_acyclic(&mut tx, task).await?;
        task_repository::update(&mut tx, task).await?;
        self.mirror(&ChangeRecord::upsert(
            EntityType::Task,
            &task.id,
            ChangeType::Update,
            serde_json::to_value(&*task)?,
        ))?;
        tx.commit().await?;
        Ok(())
    }

    /// Write a new status, bump `updated_at`, and return the task.
    #[instrument(skip(self))]
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> DomainResult<Task> {
        let _w = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut task = task_repository::get(&mut tx, task_id, true)
            .await?
            .ok_or_else(|| DomainError::task_not_found(task_id))?;
        task.status = status;
        task.touch();
        task_repository::update(&mut tx, &task).await?;
        self.mirror(&ChangeRecord::upsert(
            EntityType::Task,
            task_id,
            ChangeType::Update,
            serde_json::to_value(&task)?,
        ))?;
        tx.commit().await?;
        Ok(task)
    }

    #[instrument(skip(self))]
    pub async fn delete_task(&self, task_id: &str) -> DomainResult<()> {
        let _w = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        task_repository::delete(&mut tx, task_id).await?;
        self.mirror(&ChangeRecord::delete(EntityType::Task, task_id))?;
        tx.commit().await?;
        Ok(())
    }

    /// True iff any declared dependency is not done.
    pub async fn is_task_blocked(&self, task: &Task) -> DomainResult<bool> {
        for dep_id in &task.dependencies {
            let dep = self.get_task(dep_id, false).await?;
            match dep {
                Some(dep) if dep.status == TaskStatus::Done => {}
                _ => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Tasks of a spec grouped by status.
    pub async fn get_tasks_by_status(
        &self,
        spec_id: &str,
    ) -> DomainResult<HashMap<TaskStatus, Vec<Task>>> {
        let tasks = self.list_tasks(Some(spec_id), None).await?;
        let mut grouped: HashMap<TaskStatus, Vec<Task>> = HashMap::new();
        for task in tasks {
            grouped.entry(task.status).or_default().push(task);
        }
        Ok(grouped)
    }

    /// Tasks of a spec updated at or after the cursor, for live
    /// observers polling with a caller-held timestamp.
    pub async fn get_tasks_updated_since(
        &self,
        spec_id: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<Task>> {
        let mut conn = self.pool.acquire().await?;
        task_repository::updated_since(&mut conn, spec_id, since).await
    }

    /// Reject dependency graphs that loop back through the new/updated
    /// task. Dependencies are declared within one spec, so the walk is
    /// bounded by the spec's task set.
    async fn check_acyclic(
        &self,
        conn: &mut sqlx::SqliteConnection,
        candidate: &Task,
    ) -> DomainResult<()> {
        if candidate.dependencies.is_empty() {
            return Ok(());
        }
        let tasks = task_repository::list(conn, Some(&candidate.spec_id), None).await?;
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in &tasks {
            if task.id != candidate.id {
                edges.insert(
                    task.id.as_str(),
                    task.dependencies.iter().map(String::as_str).collect(),
                );
            }
        }
        edges.insert(
            candidate.id.as_str(),
            candidate.dependencies.iter().map(String::as_str).collect(),
        );

        // DFS from the candidate looking for a path back to it.
        let mut stack: Vec<&str> = edges[candidate.id.as_str()].clone();
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == candidate.id {
                return Err(DomainError::InvalidArgument(format!(
                    "dependency cycle involving task {}",
                    candidate.id
                )));
            }
            if seen.insert(node) {
                if let Some(next) = edges.get(node) {
                    stack.extend(next.iter().copied());
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Agent registry
    // ------------------------------------------------------------------

    /// Allocate the lowest free slot for a task's running stage.
    #[instrument(skip(self))]
    pub async fn register_agent(
        &self,
        task_id: &str,
        agent_type: AgentRole,
        pid: Option<u32>,
        worktree: Option<&str>,
    ) -> DomainResult<ActiveAgent> {
        let _w = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let agent =
            agent_repository::register(&mut tx, task_id, agent_type, pid, worktree, self.max_slots)
                .await?;
        tx.commit().await?;
        Ok(agent)
    }

    pub async fn deregister_agent_by_task(&self, task_id: &str) -> DomainResult<bool> {
        let _w = self.writer.lock().await;
        let mut conn = self.pool.acquire().await?;
        agent_repository::deregister_by_task(&mut conn, task_id).await
    }

    pub async fn deregister_agent_by_slot(&self, slot: u32) -> DomainResult<bool> {
        let _w = self.writer.lock().await;
        let mut conn = self.pool.acquire().await?;
        agent_repository::deregister_by_slot(&mut conn, slot).await
    }

    pub async fn list_active_agents(&self) -> DomainResult<Vec<ActiveAgent>> {
        let mut conn = self.pool.acquire().await?;
        agent_repository::list(&mut conn).await
    }

    pub async fn get_active_agent(&self, task_id: &str) -> DomainResult<Option<ActiveAgent>> {
        let mut conn = self.pool.acquire().await?;
        agent_repository::get_by_task(&mut conn, task_id).await
    }

    /// Remove registry rows whose recorded process is gone. Rows with no
    /// pid are never expired.
    pub async fn cleanup_stale_agents(&self) -> DomainResult<usize> {
        let _w = self.writer.lock().await;
        let mut conn = self.pool.acquire().await?;
        agent_repository::cleanup_stale(&mut conn, &process_alive).await
    }

    // ------------------------------------------------------------------
    // Ralph loops
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn register_ralph_loop(
        &self,
        task_id: &str,
        agent_type: AgentRole,
        max_iterations: u32,
    ) -> DomainResult<RalphLoop> {
        let _w = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let lp = ralph_repository::register(&mut tx, task_id, agent_type, max_iterations).await?;
        tx.commit().await?;
        Ok(lp)
    }

    pub async fn update_ralph_loop(
        &self,
        task_id: &str,
        agent_type: AgentRole,
        iteration: Option<u32>,
        verification_result: Option<&VerificationRecord>,
    ) -> DomainResult<RalphLoop> {
        let _w = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let lp = ralph_repository::update(&mut tx, task_id, agent_type, iteration, verification_result)
            .await?;
        tx.commit().await?;
        Ok(lp)
    }

    pub async fn complete_ralph_loop(
        &self,
        task_id: &str,
        agent_type: AgentRole,
        success: bool,
    ) -> DomainResult<bool> {
        let _w = self.writer.lock().await;
        let mut conn = self.pool.acquire().await?;
        ralph_repository::complete(&mut conn, task_id, agent_type, success).await
    }

    /// Cancel running loop(s). The worker notices at its next iteration
    /// boundary.
    pub async fn cancel_ralph_loop(
        &self,
        task_id: &str,
        agent_type: Option<AgentRole>,
    ) -> DomainResult<usize> {
        let _w = self.writer.lock().await;
        let mut conn = self.pool.acquire().await?;
        ralph_repository::cancel(&mut conn, task_id, agent_type).await
    }

    /// Most recent loop for a task, optionally narrowed by role.
    pub async fn get_ralph_loop(
        &self,
        task_id: &str,
        agent_type: Option<AgentRole>,
    ) -> DomainResult<Option<RalphLoop>> {
        let mut conn = self.pool.acquire().await?;
        ralph_repository::get_latest(&mut conn, task_id, agent_type).await
    }

    pub async fn get_running_ralph_loop(
        &self,
        task_id: &str,
        agent_type: AgentRole,
    ) -> DomainResult<Option<RalphLoop>> {
        let mut conn = self.pool.acquire().await?;
        ralph_repository::get_running(&mut conn, task_id, agent_type).await
    }

    pub async fn list_ralph_loops(
        &self,
        status: Option<RalphLoopStatus>,
    ) -> DomainResult<Vec<RalphLoop>> {
        let mut conn = self.pool.acquire().await?;
        ralph_repository::list(&mut conn, status).await
    }

    // ------------------------------------------------------------------
    // Execution log
    // ------------------------------------------------------------------

    pub async fn log_execution(
        &self,
        task_id: &str,
        agent_type: AgentRole,
        action: &str,
        output: &str,
        success: bool,
        duration_ms: i64,
    ) -> DomainResult<i64> {
        let _w = self.writer.lock().await;
        let mut conn = self.pool.acquire().await?;
        log_repository::insert(&mut conn, task_id, agent_type, action, output, success, duration_ms)
            .await
    }

    /// Log rows for a task in ascending time order.
    pub async fn get_execution_logs(&self, task_id: &str) -> DomainResult<Vec<ExecutionLog>> {
        let mut conn = self.pool.acquire().await?;
        log_repository::list_for_task(&mut conn, task_id).await
    }

    // ------------------------------------------------------------------
    // Change-log export / import
    // ------------------------------------------------------------------

    fn require_changelog(&self) -> DomainResult<&ChangeLog> {
        self.changelog
            .as_ref()
            .ok_or_else(|| DomainError::Config("change log is not enabled for this store".into()))
    }

    /// Rewrite the log as one create record per live entity.
    pub async fn export_all(&self) -> DomainResult<usize> {
        let changelog = self.require_changelog()?;
        let _w = self.writer.lock().await;

        let specs = self.list_specs(None).await?;
        let tasks = self.list_tasks(None, None).await?;

        changelog.clear()?;
        let mut written = 0;
        for spec in &specs {
            changelog.append(&ChangeRecord::upsert(
                EntityType::Spec,
                &spec.id,
                ChangeType::Create,
                serde_json::to_value(spec)?,
            ))?;
            written += 1;
        }
        for task in &tasks {
            changelog.append(&ChangeRecord::upsert(
                EntityType::Task,
                &task.id,
                ChangeType::Create,
                serde_json::to_value(task)?,
            ))?;
            written += 1;
        }
        Ok(written)
    }

    /// Full replay of the log into the store. Idempotent: folding the
    /// file yields final snapshots, each upserted without re-mirroring.
    pub async fn import_changes(&self) -> DomainResult<usize> {
        let changelog = self.require_changelog()?;
        let records = changelog.read_all()?;
        let state = fold_records(&records);

        let _w = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut applied = 0;

        // Specs first so task foreign keys resolve.
        for ((entity_type, _), data) in state.iter().filter(|((t, _), _)| *t == EntityType::Spec) {
            debug_assert_eq!(*entity_type, EntityType::Spec);
            let spec: Spec = serde_json::from_value(data.clone())
                .map_err(|e| DomainError::ChangeLogImport(format!("spec snapshot: {e}")))?;
            if spec_repository::get(&mut tx, &spec.id).await?.is_some() {
                spec_repository::update(&mut tx, &spec).await?;
            } else {
                spec_repository::insert(&mut tx, &spec).await?;
            }
            applied += 1;
        }
        for ((entity_type, _), data) in state.iter().filter(|((t, _), _)| *t == EntityType::Task) {
            debug_assert_eq!(*entity_type, EntityType::Task);
            let task: Task = serde_json::from_value(data.clone())
                .map_err(|e| DomainError::ChangeLogImport(format!("task snapshot: {e}")))?;
            if task_repository::get(&mut tx, &task.id, false).await?.is_some() {
                task_repository::update(&mut tx, &task).await?;
            } else {
                task_repository::insert(&mut tx, &task).await?;
            }
            applied += 1;
        }

        tx.commit().await?;
        Ok(applied)
    }

    /// Compact the log down to current state. Equivalent to export.
    pub async fn compact_changelog(&self) -> DomainResult<usize> {
        self.export_all().await
    }

    /// Records with `timestamp >= since`, in file order.
    pub async fn get_changes_since(
        &self,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<ChangeRecord>> {
        let changelog = self.require_changelog()?;
        changelog.changes_since(since)
    }

    /// Aggregate counts describing the log file.
    pub async fn sync_status(&self) -> DomainResult<SyncStatus> {
        let changelog = self.require_changelog()?;
        let records = changelog.read_all()?;
        let mut status = SyncStatus {
            total_records: records.len(),
            file_size_bytes: changelog.file_size()?,
            path: changelog.path().display().to_string(),
            ..Default::default()
        };
        for record in &records {
            match record.entity_type {
                EntityType::Spec => status.spec_records += 1,
                EntityType::Task => status.task_records += 1,
            }
            match record.change_type {
                ChangeType::Create => status.creates += 1,
                ChangeType::Update => status.updates += 1,
                ChangeType::Delete => status.deletes += 1,
            }
        }
        Ok(status)
    }
}

/// Signal-zero probe: a pid is alive when the kernel accepts the null
/// signal, or refuses it with EPERM (alive, different owner).
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}
