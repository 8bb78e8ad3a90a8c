//! Project Registry: register repositories, validate remote URLs, and
//! ensure the shared agent branch exists before a workflow touches a repo.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Project, ProjectError};
use crate::git_coordinator::GitCoordinator;
use crate::workflow_store::{WorkflowStore, WorkflowStoreError};

#[derive(Debug, Error)]
pub enum ProjectRegistryError {
    #[error("project already exists: {0}")]
    ProjectExists(String),
    #[error(transparent)]
    InvalidGitUrl(#[from] ProjectError),
    #[error("project not found: {0}")]
    NotFound(String),
    #[error("state store error: {0}")]
    Store(#[from] WorkflowStoreError),
}

pub type ProjectRegistryResult<T> = Result<T, ProjectRegistryError>;

/// Fields an `addProject` caller supplies beyond name and URL. Left to the
/// caller rather than defaulted, since the registry has no opinion on
/// where a repo should be checked out.
#[derive(Debug, Clone, Default)]
pub struct AddProjectOptions {
    pub work_dir: String,
    pub default_branch: String,
    pub integration_branch: String,
    pub base_branch: String,
    pub agent_branch: String,
    pub skip_git_url_validation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsureAgentBranchResult {
    pub success: bool,
    pub exists: bool,
    pub created: bool,
    pub branch_name: String,
}

impl EnsureAgentBranchResult {
    fn failure(branch_name: impl Into<String>) -> Self {
        Self { success: false, exists: false, created: false, branch_name: branch_name.into() }
    }
}

pub struct ProjectRegistry<S: WorkflowStore> {
    store: Arc<S>,
    cache_by_name: RwLock<Option<HashMap<String, Project>>>,
}

impl<S: WorkflowStore> ProjectRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store, cache_by_name: RwLock::new(None) }
    }

    /// The registry file on disk is replaceable out from under the
    /// process; `clearCache` forces the next lookup to reload from it.
    pub async fn clear_cache(&self) {
        *self.cache_by_name.write().await = None;
    }

    async fn cached_names(&self) -> ProjectRegistryResult<HashMap<String, Project>> {
        if let Some(cache) = self.cache_by_name.read().await.as_ref() {
            return Ok(cache.clone());
        }
        let mut guard = self.cache_by_name.write().await;
        if guard.is_none() {
            let projects = self.store.list_projects().await?;
            *guard = Some(projects.into_iter().map(|p| (p.name.clone(), p)).collect());
        }
        Ok(guard.clone().unwrap())
    }

    pub async fn add_project(
        &self,
        name: &str,
        git_url: &str,
        opts: AddProjectOptions,
    ) -> ProjectRegistryResult<Project> {
        if self.cached_names().await?.contains_key(name) {
            return Err(ProjectRegistryError::ProjectExists(name.to_string()));
        }
        if !opts.skip_git_url_validation {
            Project::validate_git_url(git_url)?;
        }

        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            git_url: git_url.to_string(),
            default_branch: opts.default_branch,
            integration_branch: opts.integration_branch,
            work_dir: opts.work_dir,
            base_branch: opts.base_branch,
            agent_branch: opts.agent_branch,
            created_at: now,
            last_used: now,
        };

        self.store.put_project(&project).await?;
        self.clear_cache().await;
        info!(project_id = %project.id, name, "registered project");
        Ok(project)
    }

    pub async fn get_project(&self, id: &str) -> ProjectRegistryResult<Project> {
        self.store
            .get_project(id)
            .await?
            .ok_or_else(|| ProjectRegistryError::NotFound(id.to_string()))
    }

    pub async fn get_project_by_name(&self, name: &str) -> ProjectRegistryResult<Project> {
        self.store
            .get_project_by_name(name)
            .await?
            .ok_or_else(|| ProjectRegistryError::NotFound(name.to_string()))
    }

    pub async fn list_projects(&self) -> ProjectRegistryResult<Vec<Project>> {
        Ok(self.store.list_projects().await?)
    }

    pub async fn touch_project(&self, id: &str) -> ProjectRegistryResult<()> {
        let mut project = self.get_project(id).await?;
        project.last_used = Utc::now();
        self.store.put_project(&project).await?;
        self.clear_cache().await;
        Ok(())
    }

    /// Ensure `agent_branch` exists in the repo checked out at `work_dir`,
    /// creating it from `base_branch` when missing. Resolution of Open
    /// Question (c): local branch creation is authoritative; pushing it
    /// upstream is a best-effort courtesy that downgrades a push failure
    /// to a warning rather than failing the call, matching how
    /// [`GitCoordinator`] already treats network operations elsewhere.
    pub async fn ensure_agent_branch(
        &self,
        work_dir: &str,
        agent_branch: &str,
        base_branch: &str,
        timeout_seconds: u64,
    ) -> EnsureAgentBranchResult {
        let work_dir = work_dir.to_string();
        let agent_branch_owned = agent_branch.to_string();
        let base_branch = base_branch.to_string();
        let branch_for_timeout = agent_branch_owned.clone();

        let task = tokio::task::spawn_blocking(move || {
            ensure_agent_branch_blocking(&work_dir, &agent_branch_owned, &base_branch)
        });

        match tokio::time::timeout(std::time::Duration::from_secs(timeout_seconds), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "ensureAgentBranch worker panicked");
                EnsureAgentBranchResult::failure(branch_for_timeout)
            }
            Err(_) => {
                warn!(timeout_seconds, branch = %branch_for_timeout, "ensureAgentBranch timed out");
                EnsureAgentBranchResult::failure(branch_for_timeout)
            }
        }
    }
}

fn ensure_agent_branch_blocking(work_dir: &str, agent_branch: &str, base_branch: &str) -> EnsureAgentBranchResult {
    let coord = GitCoordinator::new(work_dir);

    match coord.branch_exists_local(agent_branch) {
        Ok(true) => {
            return EnsureAgentBranchResult { success: true, exists: true, created: false, branch_name: agent_branch.to_string() };
        }
        Ok(false) => {}
        Err(e) => {
            warn!(error = %e, "failed to check local branch existence");
            return EnsureAgentBranchResult::failure(agent_branch);
        }
    }

    match coord.branch_exists_remote("origin", agent_branch) {
        Ok(true) => {
            return match coord.track_remote_branch("origin", agent_branch) {
                Ok(()) => EnsureAgentBranchResult { success: true, exists: true, created: false, branch_name: agent_branch.to_string() },
                Err(e) => {
                    warn!(error = %e, "failed to track existing remote branch");
                    EnsureAgentBranchResult::failure(agent_branch)
                }
            };
        }
        Ok(false) => {}
        Err(e) => {
            // Remote may be unreachable; fall through and try a local create.
            warn!(error = %e, "failed to check remote branch existence, assuming absent");
        }
    }

    if let Err(e) = coord.create_branch(agent_branch, base_branch) {
        warn!(error = %e, "failed to create agent branch locally");
        return EnsureAgentBranchResult::failure(agent_branch);
    }

    if let Err(e) = coord.push("origin", agent_branch) {
        warn!(error = %e, branch = agent_branch, "push of newly created agent branch failed, continuing");
    }

    EnsureAgentBranchResult { success: true, exists: false, created: true, branch_name: agent_branch.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow_store::JsonFileStore;

    fn registry() -> ProjectRegistry<JsonFileStore> {
        let dir = tempfile::tempdir().unwrap();
        ProjectRegistry::new(Arc::new(JsonFileStore::new(dir.path())))
    }

    #[tokio::test]
    async fn add_project_rejects_invalid_url() {
        let reg = registry();
        let err = reg.add_project("demo", "not a url", AddProjectOptions::default()).await.unwrap_err();
        assert!(matches!(err, ProjectRegistryError::InvalidGitUrl(_)));
    }

    #[tokio::test]
    async fn add_project_rejects_duplicate_names() {
        let reg = registry();
        let opts = AddProjectOptions { skip_git_url_validation: true, ..Default::default() };
        reg.add_project("demo", "git@example.com:org/repo.git", opts.clone()).await.unwrap();
        let err = reg.add_project("demo", "git@example.com:org/other.git", opts).await.unwrap_err();
        assert!(matches!(err, ProjectRegistryError::ProjectExists(_)));
    }

    #[tokio::test]
    async fn clear_cache_allows_re_adding_after_external_removal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()));
        let reg = ProjectRegistry::new(store.clone());
        let opts = AddProjectOptions { skip_git_url_validation: true, ..Default::default() };
        let project = reg.add_project("demo", "git@example.com:org/repo.git", opts.clone()).await.unwrap();

        // Simulate the registry file being replaced on disk out from under us.
        tokio::fs::remove_file(dir.path().join("projects-by-name/demo.json")).await.unwrap();
        tokio::fs::remove_file(dir.path().join(format!("projects/{}.json", project.id))).await.unwrap();
        reg.clear_cache().await;

        reg.add_project("demo", "git@example.com:org/repo.git", opts).await.unwrap();
    }

    #[tokio::test]
    async fn touch_project_updates_last_used() {
        let reg = registry();
        let opts = AddProjectOptions { skip_git_url_validation: true, ..Default::default() };
        let project = reg.add_project("demo", "git@example.com:org/repo.git", opts).await.unwrap();
        let before = project.last_used;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        reg.touch_project(&project.id).await.unwrap();

        let reloaded = reg.get_project(&project.id).await.unwrap();
        assert!(reloaded.last_used > before);
    }

    #[tokio::test]
    async fn ensure_agent_branch_creates_branch_from_base() {
        let dir = tempfile::tempdir().unwrap();
        std::process::Command::new("git").args(["init", "-b", "main"]).current_dir(dir.path()).output().unwrap();
        std::process::Command::new("git").args(["config", "user.email", "t@t.com"]).current_dir(dir.path()).output().unwrap();
        std::process::Command::new("git").args(["config", "user.name", "T"]).current_dir(dir.path()).output().unwrap();
        std::fs::write(dir.path().join("f.txt"), "base\n").unwrap();
        std::process::Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        std::process::Command::new("git").args(["commit", "-m", "init"]).current_dir(dir.path()).output().unwrap();

        let reg = registry();
        let result = reg.ensure_agent_branch(dir.path().to_str().unwrap(), "agent-main", "main", 10).await;
        assert!(result.success);
        assert!(result.created);
        assert!(!result.exists);
    }

    #[tokio::test]
    async fn ensure_agent_branch_reports_existing_branch() {
        let dir = tempfile::tempdir().unwrap();
        std::process::Command::new("git").args(["init", "-b", "main"]).current_dir(dir.path()).output().unwrap();
        std::process::Command::new("git").args(["config", "user.email", "t@t.com"]).current_dir(dir.path()).output().unwrap();
        std::process::Command::new("git").args(["config", "user.name", "T"]).current_dir(dir.path()).output().unwrap();
        std::fs::write(dir.path().join("f.txt"), "base\n").unwrap();
        std::process::Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        std::process::Command::new("git").args(["commit", "-m", "init"]).current_dir(dir.path()).output().unwrap();
        std::process::Command::new("git").args(["branch", "agent-main"]).current_dir(dir.path()).output().unwrap();

        let reg = registry();
        let result = reg.ensure_agent_branch(dir.path().to_str().unwrap(), "agent-main", "main", 10).await;
        assert!(result.success);
        assert!(result.exists);
        assert!(!result.created);
    }
}
