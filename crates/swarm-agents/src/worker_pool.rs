//! Worker Pool — runs grandchild tickets under a bounded concurrency limit,
//! each through the same branch→execute→commit→quality-gate→report
//! lifecycle. Concurrency is a `Semaphore` acquired before any workspace
//! work starts, the same fan-out-with-a-permit shape `modes::deepthink`
//! uses for its strategy workers; submissions over capacity simply wait on
//! the semaphore in arrival order rather than being queued explicitly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swarm_core::{
    AgentMessage, Artifact, GitCoordinator, GitCoordinatorError, GrandchildTicket, MessageBus,
    MessagePayload, QualityGate, QualityGateConfig, QualityGateError, QualityGateOutcome,
};
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub use_containers: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { max_workers: 4, use_containers: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Partial,
    QualityFailed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: String,
    pub ticket_id: String,
    pub agent_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub artifacts: Vec<Artifact>,
    pub git_branch: String,
    pub commits: Vec<CommitInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_gates: Option<QualityGateOutcome>,
    pub errors: Vec<String>,
    pub conversation_turns: u32,
    pub tokens_used: u32,
}

/// What a `TicketExecutor` produced before the pool commits and gates it.
/// `commit_message` is ignored when `artifacts` is empty — nothing to
/// commit means no task branch mutation took place.
pub struct WorkerOutcome {
    pub artifacts: Vec<Artifact>,
    pub commit_message: String,
    pub errors: Vec<String>,
    pub conversation_turns: u32,
    pub tokens_used: u32,
}

/// Either a `CodingAgentAdapter` invocation or an LLM chat loop over the
/// Tool Call Surface — whichever the caller selects for `ticket.lane`.
#[async_trait]
pub trait TicketExecutor: Send + Sync {
    async fn execute(&self, ticket: &GrandchildTicket, workspace: &Path) -> WorkerOutcome;
}

#[derive(Debug, Error)]
pub enum WorkerPoolError {
    #[error("git error: {0}")]
    Git(#[from] GitCoordinatorError),
    #[error("quality gate error: {0}")]
    QualityGate(#[from] QualityGateError),
}

pub type WorkerPoolResult<T> = Result<T, WorkerPoolError>;

pub struct WorkerPool {
    config: WorkerPoolConfig,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Self { config, semaphore }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Runs one grandchild ticket's full worker lifecycle: acquire a
    /// worker slot, create a task branch from `agent_branch`, run
    /// `executor`, commit anything it produced, run the Quality Gate if
    /// one is configured, and report the result over `bus` if given.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &self,
        run_id: &str,
        ticket: GrandchildTicket,
        agent_id: &str,
        work_dir: &Path,
        agent_branch: &str,
        executor: Arc<dyn TicketExecutor>,
        quality_gate: Option<(Arc<QualityGate>, QualityGateConfig)>,
        bus: Option<Arc<dyn MessageBus>>,
    ) -> WorkerPoolResult<ExecutionResult> {
        let _permit = self.semaphore.acquire().await.expect("worker pool semaphore closed");
        let start_time = Utc::now();

        let git = GitCoordinator::new(work_dir);
        let task_branch = git.create_task_branch(&ticket.id, &ticket.title, agent_branch)?;
        git.checkout(&task_branch)?;

        let outcome = executor.execute(&ticket, work_dir).await;
        let mut errors = outcome.errors;
        let mut commits = Vec::new();

        if !outcome.artifacts.is_empty() {
            match git.commit_with_ticket_id(&ticket.id, &outcome.commit_message) {
                Ok(hash) => commits.push(CommitInfo {
                    hash,
                    message: outcome.commit_message.clone(),
                    author: agent_id.to_string(),
                    timestamp: Utc::now(),
                }),
                Err(e) => errors.push(format!("commit failed: {e}")),
            }
        }

        let quality_outcome = match &quality_gate {
            Some((gate, gate_config)) => match gate.run(work_dir, gate_config).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    errors.push(format!("quality gate error: {e}"));
                    None
                }
            },
            None => None,
        };

        let status = match &quality_outcome {
            Some(q) if !q.success => ExecutionStatus::QualityFailed,
            _ if !errors.is_empty() && commits.is_empty() => ExecutionStatus::Error,
            _ if !errors.is_empty() => ExecutionStatus::Partial,
            _ => ExecutionStatus::Success,
        };

        let result = ExecutionResult {
            run_id: run_id.to_string(),
            ticket_id: ticket.id.clone(),
            agent_id: agent_id.to_string(),
            status,
            start_time,
            end_time: Utc::now(),
            artifacts: outcome.artifacts,
            git_branch: task_branch,
            commits,
            quality_gates: quality_outcome,
            errors,
            conversation_turns: outcome.conversation_turns,
            tokens_used: outcome.tokens_used,
        };

        if let Some(bus) = bus {
            let payload = MessagePayload::TaskResult {
                run_id: run_id.to_string(),
                ticket_id: ticket.id.clone(),
                status: status_label(result.status),
                summary: format!("{} commit(s), {} error(s)", result.commits.len(), result.errors.len()),
            };
            let _ = bus.send(AgentMessage::new(agent_id, "engine", payload)).await;
        }

        Ok(result)
    }
}

fn status_label(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Success => "success",
        ExecutionStatus::Partial => "partial",
        ExecutionStatus::QualityFailed => "quality_failed",
        ExecutionStatus::Error => "error",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::{ArtifactAction, ChildLane};
    use tempfile::TempDir;

    struct StubExecutor {
        path: PathBuf,
    }

    #[async_trait]
    impl TicketExecutor for StubExecutor {
        async fn execute(&self, _ticket: &GrandchildTicket, workspace: &Path) -> WorkerOutcome {
            std::fs::write(workspace.join("output.txt"), "done").unwrap();
            WorkerOutcome {
                artifacts: vec![Artifact {
                    path: self.path.to_string_lossy().into_owned(),
                    action: ArtifactAction::Created,
                    diff: None,
                }],
                commit_message: "do the thing".to_string(),
                errors: Vec::new(),
                conversation_turns: 1,
                tokens_used: 100,
            }
        }
    }

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            std::process::Command::new("git").args(args).current_dir(dir.path()).output().unwrap();
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.path().join("README.md"), "init").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "init"]);
        run(&["branch", "agent/main"]);
        dir
    }

    #[tokio::test]
    async fn submit_creates_branch_and_commits_artifacts() {
        let dir = init_repo();
        let pool = WorkerPool::new(WorkerPoolConfig { max_workers: 2, use_containers: false });
        let ticket = GrandchildTicket::new("gc-1", "child-1", ChildLane::Developer, "title", "desc", vec![]);
        let executor = Arc::new(StubExecutor { path: "output.txt".into() });

        let result = pool
            .submit("run-1", ticket, "worker-1", dir.path(), "agent/main", executor, None, None)
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.commits.len(), 1);
        assert!(result.git_branch.contains("gc-1") || !result.git_branch.is_empty());
    }

    #[tokio::test]
    async fn pool_limits_concurrency_to_max_workers() {
        let pool = WorkerPool::new(WorkerPoolConfig { max_workers: 1, use_containers: false });
        assert_eq!(pool.semaphore.available_permits(), 1);
    }
}
