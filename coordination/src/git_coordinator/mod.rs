//! Git Coordinator — branch naming, staging, commits, merges with
//! conflict detection/auto-resolution, and credential-path guarding.
//!
//! Shells out to the `git` CLI directly (as the rest of this codebase
//! already does for git operations) rather than adding a `git2` dependency.
//! Network operations (`clone`, `pull`, `push`) retry with exponential
//! backoff on transient failure; local operations do not, since retrying a
//! failed local commit risks double-committing.

mod naming;

pub use naming::{commit_message, is_forbidden_path, task_branch_name};

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;
const NETWORK_OPS: &[&str] = &["clone", "pull", "push"];

#[derive(Debug, Error)]
pub enum GitCoordinatorError {
    #[error("git {operation} failed: {message}")]
    Command { operation: String, message: String },
    #[error("refusing to touch forbidden path: {0}")]
    ForbiddenPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GitResult<T> = Result<T, GitCoordinatorError>;

impl GitCoordinatorError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Command { message, .. } => {
                let lower = message.to_lowercase();
                lower.contains("lock")
                    || lower.contains("timeout")
                    || lower.contains("connection")
                    || lower.contains("network")
                    || lower.contains("could not lock")
                    || lower.contains("another git process")
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictFile {
    pub path: String,
    pub has_base: bool,
    pub has_ours: bool,
    pub has_theirs: bool,
    pub auto_resolvable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
    pub ticket_id: String,
    pub files: Vec<ConflictFile>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub success: bool,
    pub auto_resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_report: Option<ConflictReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEscalation {
    #[serde(rename = "type")]
    pub kind: String,
    pub ticket_id: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub report: ConflictReport,
}

pub struct GitCoordinator {
    working_dir: PathBuf,
    max_retries: u32,
    run_dir: Option<PathBuf>,
}

impl GitCoordinator {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            max_retries: DEFAULT_MAX_RETRIES,
            run_dir: None,
        }
    }

    pub fn with_run_dir(mut self, run_dir: impl Into<PathBuf>) -> Self {
        self.run_dir = Some(run_dir.into());
        self
    }

    fn run(&self, op: &str, args: &[&str]) -> GitResult<String> {
        let start = Instant::now();
        let result = self.run_inner(args);
        self.log(op, args, &result, start.elapsed());
        result
    }

    fn run_inner(&self, args: &[&str]) -> GitResult<String> {
        let op = args.first().copied().unwrap_or("git");
        let is_network_op = NETWORK_OPS.contains(&op);
        let retries = if is_network_op { self.max_retries } else { 0 };

        let mut last_err = None;
        for attempt in 0..=retries {
            match self.exec(args) {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retryable() && attempt < retries => {
                    let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                    std::thread::sleep(Duration::from_millis(delay));
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| GitCoordinatorError::Command {
            operation: op.to_string(),
            message: "max retries exceeded".to_string(),
        }))
    }

    fn exec(&self, args: &[&str]) -> GitResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()?;

        if !output.status.success() {
            return Err(GitCoordinatorError::Command {
                operation: args.join(" "),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn log(&self, op: &str, args: &[&str], result: &GitResult<String>, elapsed: Duration) {
        let Some(run_dir) = &self.run_dir else {
            return;
        };
        let status = match result {
            Ok(_) => "[SUCCESS]".to_string(),
            Err(e) => format!("[FAILED: {e}]"),
        };
        let params = args[1..].join(" ");
        let line = format!(
            "{} [{op}] {params} {status} [{}ms]\n",
            Utc::now().to_rfc3339(),
            elapsed.as_millis()
        );
        if let Err(e) = std::fs::create_dir_all(run_dir)
            .and_then(|_| {
                use std::io::Write;
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(run_dir.join("git.log"))?;
                file.write_all(line.as_bytes())
            })
        {
            warn!(error = %e, "failed to append to git.log");
        }
    }

    fn guard_path(&self, path: &str) -> GitResult<()> {
        if is_forbidden_path(path) {
            return Err(GitCoordinatorError::ForbiddenPath(path.to_string()));
        }
        Ok(())
    }

    pub fn clone(&self, url: &str, dest: &str) -> GitResult<()> {
        self.guard_path(dest)?;
        self.run("clone", &["clone", url, dest])?;
        Ok(())
    }

    pub fn create_branch(&self, name: &str, base: &str) -> GitResult<()> {
        self.run("createBranch", &["checkout", "-b", name, base])?;
        Ok(())
    }

    pub fn checkout(&self, branch: &str) -> GitResult<()> {
        self.run("checkout", &["checkout", branch])?;
        Ok(())
    }

    pub fn pull(&self, remote: &str, branch: &str) -> GitResult<()> {
        self.run("pull", &["pull", remote, branch])?;
        Ok(())
    }

    pub fn stage(&self, paths: &[&str]) -> GitResult<()> {
        let mut args = vec!["add"];
        args.extend_from_slice(paths);
        self.run("stage", &args)?;
        Ok(())
    }

    pub fn commit(&self, message: &str) -> GitResult<String> {
        self.run("commit", &["commit", "-m", message])?;
        self.run("commit", &["rev-parse", "HEAD"])
    }

    pub fn push(&self, remote: &str, branch: &str) -> GitResult<()> {
        self.run("push", &["push", remote, branch])?;
        Ok(())
    }

    pub fn get_status(&self) -> GitResult<String> {
        self.run("getStatus", &["status", "--porcelain"])
    }

    pub fn branch_exists_local(&self, branch: &str) -> GitResult<bool> {
        let out = self.run("branchExistsLocal", &["branch", "--list", branch])?;
        Ok(!out.trim().is_empty())
    }

    pub fn branch_exists_remote(&self, remote: &str, branch: &str) -> GitResult<bool> {
        let out = self.run("branchExistsRemote", &["ls-remote", "--heads", remote, branch])?;
        Ok(!out.trim().is_empty())
    }

    /// Create a local branch tracking `<remote>/<branch>`.
    pub fn track_remote_branch(&self, remote: &str, branch: &str) -> GitResult<()> {
        self.run("trackRemoteBranch", &["checkout", "-b", branch, &format!("{remote}/{branch}")])?;
        Ok(())
    }

    /// Create and check out `agent/<ticket-id>-<slug(description)>` from
    /// `base`.
    pub fn create_task_branch(&self, ticket_id: &str, description: &str, base: &str) -> GitResult<String> {
        let branch = task_branch_name(ticket_id, description);
        self.run("createTaskBranch", &["checkout", "-b", &branch, base])?;
        Ok(branch)
    }

    /// Stage everything and commit with the exact `[<ticket-id>] <description>`
    /// format.
    pub fn commit_with_ticket_id(&self, ticket_id: &str, description: &str) -> GitResult<String> {
        self.run("commitWithTicketId", &["add", "-A"])?;
        let message = commit_message(ticket_id, description);
        self.run("commitWithTicketId", &["commit", "-m", &message])?;
        self.run("commitWithTicketId", &["rev-parse", "HEAD"])
    }

    /// Merge `task_branch` into `agent_branch`, auto-resolving conflicts
    /// where safe per the three-way rule: a file is auto-resolvable iff
    /// `ours == theirs`, or one side equals `base`.
    pub fn merge_to_agent_branch(&self, ticket_id: &str, task_branch: &str, agent_branch: &str) -> GitResult<MergeResult> {
        self.run("mergeToAgentBranch", &["checkout", agent_branch])?;

        match self.run_inner(&["merge", "--no-ff", task_branch]) {
            Ok(_) => Ok(MergeResult {
                success: true,
                auto_resolved: false,
                conflict_report: None,
            }),
            Err(_) => {
                let conflicts = self.get_conflicts()?;
                if conflicts.is_empty() {
                    return Ok(MergeResult {
                        success: true,
                        auto_resolved: false,
                        conflict_report: None,
                    });
                }

                let resolved = self.attempt_auto_resolve(&conflicts)?;
                if resolved {
                    self.run("mergeToAgentBranch", &["commit", "--no-edit"])?;
                    Ok(MergeResult {
                        success: true,
                        auto_resolved: true,
                        conflict_report: None,
                    })
                } else {
                    let report = self.generate_conflict_report(ticket_id, &conflicts);
                    self.run_inner(&["merge", "--abort"]).ok();
                    Ok(MergeResult {
                        success: false,
                        auto_resolved: false,
                        conflict_report: Some(report),
                    })
                }
            }
        }
    }

    /// List conflicted paths and classify each by which three-way stages
    /// are present and whether it is safely auto-resolvable.
    pub fn get_conflicts(&self) -> GitResult<Vec<ConflictFile>> {
        let status = self.run_inner(&["status", "--porcelain"])?;
        let mut files = Vec::new();
        for line in status.lines() {
            if !line.starts_with("UU") && !line.starts_with("AA") && !line.starts_with("DD") {
                continue;
            }
            let Some(path) = line.get(3..) else { continue };
            files.push(self.classify_conflict(path)?);
        }
        Ok(files)
    }

    fn classify_conflict(&self, path: &str) -> GitResult<ConflictFile> {
        let base = self.stage_content(1, path);
        let ours = self.stage_content(2, path);
        let theirs = self.stage_content(3, path);

        let auto_resolvable = match (&base, &ours, &theirs) {
            (_, Some(o), Some(t)) if o == t => true,
            (Some(b), Some(o), _) if o == b => true,
            (Some(b), _, Some(t)) if t == b => true,
            _ => false,
        };

        Ok(ConflictFile {
            path: path.to_string(),
            has_base: base.is_some(),
            has_ours: ours.is_some(),
            has_theirs: theirs.is_some(),
            auto_resolvable,
        })
    }

    fn stage_content(&self, stage: u8, path: &str) -> Option<String> {
        self.run_inner(&["show", &format!(":{stage}:{path}")]).ok()
    }

    /// Write back and stage the non-base content for every auto-resolvable
    /// file. Returns `true` iff every conflicted file was resolved.
    pub fn attempt_auto_resolve(&self, conflicts: &[ConflictFile]) -> GitResult<bool> {
        let mut all_resolved = true;
        for conflict in conflicts {
            if !conflict.auto_resolvable {
                all_resolved = false;
                continue;
            }
            self.guard_path(&conflict.path)?;

            let winner = self
                .stage_content(2, &conflict.path)
                .or_else(|| self.stage_content(3, &conflict.path));

            let Some(content) = winner else {
                all_resolved = false;
                continue;
            };

            let full_path = self.working_dir.join(&conflict.path);
            std::fs::write(&full_path, content)?;
            self.run_inner(&["add", &conflict.path])?;
        }
        Ok(all_resolved)
    }

    pub fn generate_conflict_report(&self, ticket_id: &str, conflicts: &[ConflictFile]) -> ConflictReport {
        let unresolved: Vec<&str> = conflicts
            .iter()
            .filter(|c| !c.auto_resolvable)
            .map(|c| c.path.as_str())
            .collect();
        let summary = if unresolved.is_empty() {
            format!("{} file(s) auto-resolved", conflicts.len())
        } else {
            format!(
                "{}/{} file(s) could not be auto-resolved: {}",
                unresolved.len(),
                conflicts.len(),
                unresolved.join(", ")
            )
        };
        ConflictReport {
            ticket_id: ticket_id.to_string(),
            files: conflicts.to_vec(),
            summary,
        }
    }

    pub fn escalate_conflict(&self, report: ConflictReport) -> ConflictEscalation {
        ConflictEscalation {
            kind: "conflict_escalation".to_string(),
            ticket_id: report.ticket_id.clone(),
            timestamp: Utc::now(),
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn init_repo() -> (tempfile::TempDir, GitCoordinator) {
        let dir = tempdir().unwrap();
        Command::new("git").args(["init", "-b", "main"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["config", "user.email", "t@t.com"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["config", "user.name", "T"]).current_dir(dir.path()).output().unwrap();
        std::fs::write(dir.path().join("f.txt"), "base\n").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-m", "init"]).current_dir(dir.path()).output().unwrap();
        let coord = GitCoordinator::new(dir.path());
        (dir, coord)
    }

    #[test]
    fn create_task_branch_uses_naming_contract() {
        let (_dir, coord) = init_repo();
        let branch = coord.create_task_branch("T-1", "fix thing", "main").unwrap();
        assert_eq!(branch, "agent/T-1-fix-thing");
        assert_eq!(coord.run_inner(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap(), branch);
    }

    #[test]
    fn commit_with_ticket_id_uses_exact_format() {
        let (dir, coord) = init_repo();
        std::fs::write(dir.path().join("g.txt"), "new\n").unwrap();
        coord.commit_with_ticket_id("T-9", "add g").unwrap();
        let log = coord.run_inner(&["log", "-1", "--format=%s"]).unwrap();
        assert_eq!(log, "[T-9] add g");
    }

    #[test]
    fn merge_with_no_conflict_succeeds() {
        let (dir, coord) = init_repo();
        coord.create_task_branch("T-1", "feature", "main").unwrap();
        std::fs::write(dir.path().join("new.txt"), "hi\n").unwrap();
        coord.commit_with_ticket_id("T-1", "add new file").unwrap();

        let result = coord.merge_to_agent_branch("T-1", "agent/T-1-feature", "main").unwrap();
        assert!(result.success);
        assert!(!result.auto_resolved);
        assert!(result.conflict_report.is_none());
    }

    #[test]
    fn merge_auto_resolves_when_one_side_matches_base() {
        let (dir, coord) = init_repo();
        coord.create_task_branch("T-1", "feature", "main").unwrap();
        std::fs::write(dir.path().join("f.txt"), "changed on branch\n").unwrap();
        coord.commit_with_ticket_id("T-1", "edit f").unwrap();

        // main stays at base content for f.txt, so ours == base on main
        // side; merging the task branch in should auto-resolve to theirs.
        let result = coord.merge_to_agent_branch("T-1", "agent/T-1-feature", "main").unwrap();
        assert!(result.success);
        assert!(result.auto_resolved);
        let content = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(content, "changed on branch\n");
    }

    #[test]
    fn merge_reports_unresolvable_conflict() {
        let (dir, coord) = init_repo();
        coord.create_task_branch("T-1", "feature", "main").unwrap();
        std::fs::write(dir.path().join("f.txt"), "branch version\n").unwrap();
        coord.commit_with_ticket_id("T-1", "edit f on branch").unwrap();

        coord.checkout("main").unwrap();
        std::fs::write(dir.path().join("f.txt"), "main version\n").unwrap();
        coord.commit_with_ticket_id("T-2", "edit f on main").unwrap();

        let result = coord.merge_to_agent_branch("T-1", "agent/T-1-feature", "main").unwrap();
        assert!(!result.success);
        let report = result.conflict_report.unwrap();
        assert_eq!(report.ticket_id, "T-1");
        assert!(report.files.iter().any(|f| f.path == "f.txt" && !f.auto_resolvable));
    }

    #[test]
    fn git_log_written_when_run_dir_set() {
        let (dir, _coord) = init_repo();
        let coord = GitCoordinator::new(dir.path()).with_run_dir(dir.path().join("run"));
        coord.get_status().unwrap();
        let log = std::fs::read_to_string(dir.path().join("run").join("git.log")).unwrap();
        assert!(log.contains("[getStatus]"));
        assert!(log.contains("[SUCCESS]"));
    }
}
