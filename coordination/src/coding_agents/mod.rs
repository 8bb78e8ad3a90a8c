//! Coding-Agent Registry — capability-detected external CLI wrappers
//! (`opencode`, `claude`, `kiro`, ...) with priority fallback.
//!
//! Distinct from [`crate::registry::ProviderRegistry`], which tracks LLM
//! *model* providers reached over HTTP; this registry tracks external
//! *coding-agent* CLIs the Worker Pool shells out to via the Process
//! Supervisor. Availability is a TTL-cached probe (`<binary> --version`
//! through the same supervisor every other subprocess call in this crate
//! uses) rather than a live check on every selection, since a CLI's
//! presence on `PATH` changes rarely within a run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::supervisor::{ExecOptions, ProcessSupervisor, SupervisorError};

/// How long a positive or negative availability probe is trusted before
/// re-checking.
const AVAILABILITY_TTL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodingAgentName {
    OpenCode,
    ClaudeCode,
    KiroCli,
}

impl CodingAgentName {
    pub fn binary(&self) -> &'static str {
        match self {
            Self::OpenCode => "opencode",
            Self::ClaudeCode => "claude",
            Self::KiroCli => "kiro",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenCode => "OpenCode",
            Self::ClaudeCode => "Claude Code",
            Self::KiroCli => "Kiro CLI",
        }
    }
}

#[derive(Debug, Error)]
pub enum CodingAgentError {
    #[error("coding agent {0} unavailable")]
    Unavailable(String),
    #[error("unknown coding agent: {0}")]
    Unknown(String),
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}

pub type CodingAgentResult<T> = Result<T, CodingAgentError>;

/// Everything `CliCodingAgentAdapter::execute` needs — workspace, prompt,
/// a per-call timeout, and extra environment.
#[derive(Debug, Clone)]
pub struct CodingAgentRequest {
    pub working_directory: PathBuf,
    pub prompt: String,
    pub timeout_seconds: Option<u64>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct CodingAgentResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CodingAgentResponse {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The capability set spec.md §9 calls for: `{execute, isAvailable,
/// getVersion, name, displayName}`.
#[async_trait]
pub trait CodingAgentAdapter: Send + Sync {
    fn name(&self) -> CodingAgentName;
    fn display_name(&self) -> &str {
        self.name().display_name()
    }
    async fn is_available(&self) -> bool;
    async fn get_version(&self) -> Option<String>;
    async fn execute(&self, req: CodingAgentRequest) -> CodingAgentResult<CodingAgentResponse>;
}

/// Invokes `<binary> --print <prompt>` under the Process Supervisor, with
/// its own TTL-cached `--version` probe for [`CodingAgentAdapter::is_available`].
pub struct CliCodingAgentAdapter {
    name: CodingAgentName,
    supervisor: Arc<ProcessSupervisor>,
    last_probe: Mutex<Option<(bool, Instant)>>,
}

impl CliCodingAgentAdapter {
    pub fn new(name: CodingAgentName, supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { name, supervisor, last_probe: Mutex::new(None) }
    }

    async fn probe_version(&self) -> Option<String> {
        let argv = vec![self.name.binary().to_string(), "--version".to_string()];
        match self.supervisor.execute(&argv, ExecOptions::default()).await {
            Ok(result) if result.exit_code == Some(0) => {
                Some(result.stdout.trim().to_string())
            }
            _ => None,
        }
    }
}

#[async_trait]
impl CodingAgentAdapter for CliCodingAgentAdapter {
    fn name(&self) -> CodingAgentName {
        self.name
    }

    async fn is_available(&self) -> bool {
        {
            let cached = self.last_probe.lock().await;
            if let Some((available, checked_at)) = *cached {
                if checked_at.elapsed() < Duration::from_secs(AVAILABILITY_TTL_SECS) {
                    return available;
                }
            }
        }

        let available = self.probe_version().await.is_some();
        *self.last_probe.lock().await = Some((available, Instant::now()));
        debug!(agent = self.name.binary(), available, "coding agent availability probe");
        available
    }

    async fn get_version(&self) -> Option<String> {
        self.probe_version().await
    }

    async fn execute(&self, req: CodingAgentRequest) -> CodingAgentResult<CodingAgentResponse> {
        if !self.is_available().await {
            return Err(CodingAgentError::Unavailable(self.name.binary().to_string()));
        }

        let argv = vec![
            self.name.binary().to_string(),
            "--print".to_string(),
            req.prompt,
        ];
        let opts = ExecOptions {
            cwd: Some(req.working_directory),
            env: req.env,
            timeout_seconds: req.timeout_seconds,
            run_dir: None,
        };
        let result = self.supervisor.execute(&argv, opts).await?;
        Ok(CodingAgentResponse {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
        })
    }
}

/// Process-wide coding-agent directory: an ordered priority list plus
/// by-name lookup, matching how [`crate::registry::ProviderRegistry`]
/// shapes LLM provider selection. Construction and teardown are explicit
/// (`new`/`with_default_agents`) rather than a lazily-initialized global.
pub struct CodingAgentRegistry {
    agents: HashMap<CodingAgentName, Arc<dyn CodingAgentAdapter>>,
    priority: Vec<CodingAgentName>,
}

impl CodingAgentRegistry {
    pub fn new() -> Self {
        Self { agents: HashMap::new(), priority: Vec::new() }
    }

    /// Registers the three adapters spec.md §9 names, in the priority
    /// order a fallback selection walks when no explicit agent is named.
    pub fn with_default_agents(supervisor: Arc<ProcessSupervisor>) -> Self {
        let mut registry = Self::new();
        for name in [CodingAgentName::ClaudeCode, CodingAgentName::OpenCode, CodingAgentName::KiroCli] {
            registry.register(Arc::new(CliCodingAgentAdapter::new(name, supervisor.clone())));
        }
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn CodingAgentAdapter>) {
        let name = adapter.name();
        if !self.priority.contains(&name) {
            self.priority.push(name);
        }
        self.agents.insert(name, adapter);
    }

    /// Selects `explicit` if registered, else the highest-priority
    /// available agent. `Unknown` if `explicit` names an unregistered
    /// agent, `Unavailable` if no agent (explicit or otherwise) is up.
    pub async fn select(
        &self,
        explicit: Option<CodingAgentName>,
    ) -> CodingAgentResult<Arc<dyn CodingAgentAdapter>> {
        if let Some(name) = explicit {
            let agent = self
                .agents
                .get(&name)
                .ok_or_else(|| CodingAgentError::Unknown(name.binary().to_string()))?;
            return if agent.is_available().await {
                Ok(agent.clone())
            } else {
                Err(CodingAgentError::Unavailable(name.binary().to_string()))
            };
        }

        for name in &self.priority {
            if let Some(agent) = self.agents.get(name) {
                if agent.is_available().await {
                    return Ok(agent.clone());
                }
            }
        }
        warn!("no coding agent available across priority fallback");
        Err(CodingAgentError::Unavailable("<any>".to_string()))
    }

    /// `true` if at least one registered agent is currently available —
    /// the coding-agent half of the AI-availability gate (spec.md §4.12).
    pub async fn any_available(&self) -> bool {
        for name in &self.priority {
            if let Some(agent) = self.agents.get(name) {
                if agent.is_available().await {
                    return true;
                }
            }
        }
        false
    }

    pub fn registered_names(&self) -> Vec<CodingAgentName> {
        self.priority.clone()
    }
}

impl Default for CodingAgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubAdapter {
        name: CodingAgentName,
        available: AtomicBool,
    }

    #[async_trait]
    impl CodingAgentAdapter for StubAdapter {
        fn name(&self) -> CodingAgentName {
            self.name
        }

        async fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        async fn get_version(&self) -> Option<String> {
            self.available.load(Ordering::SeqCst).then(|| "1.0.0".to_string())
        }

        async fn execute(&self, req: CodingAgentRequest) -> CodingAgentResult<CodingAgentResponse> {
            if !self.is_available().await {
                return Err(CodingAgentError::Unavailable(self.name.binary().to_string()));
            }
            Ok(CodingAgentResponse {
                stdout: format!("handled: {}", req.prompt),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    fn stub(name: CodingAgentName, available: bool) -> Arc<dyn CodingAgentAdapter> {
        Arc::new(StubAdapter { name, available: AtomicBool::new(available) })
    }

    #[tokio::test]
    async fn explicit_selection_wins_when_available() {
        let mut registry = CodingAgentRegistry::new();
        registry.register(stub(CodingAgentName::ClaudeCode, true));
        registry.register(stub(CodingAgentName::OpenCode, true));

        let agent = registry.select(Some(CodingAgentName::OpenCode)).await.unwrap();
        assert_eq!(agent.name(), CodingAgentName::OpenCode);
    }

    #[tokio::test]
    async fn unknown_explicit_agent_is_rejected() {
        let registry = CodingAgentRegistry::new();
        let err = registry.select(Some(CodingAgentName::ClaudeCode)).await.unwrap_err();
        assert!(matches!(err, CodingAgentError::Unknown(_)));
    }

    #[tokio::test]
    async fn priority_fallback_skips_unavailable_agents() {
        let mut registry = CodingAgentRegistry::new();
        registry.register(stub(CodingAgentName::ClaudeCode, false));
        registry.register(stub(CodingAgentName::OpenCode, true));
        registry.priority = vec![CodingAgentName::ClaudeCode, CodingAgentName::OpenCode];

        let agent = registry.select(None).await.unwrap();
        assert_eq!(agent.name(), CodingAgentName::OpenCode);
    }

    #[tokio::test]
    async fn no_available_agent_is_unavailable_error() {
        let mut registry = CodingAgentRegistry::new();
        registry.register(stub(CodingAgentName::ClaudeCode, false));
        let err = registry.select(None).await.unwrap_err();
        assert!(matches!(err, CodingAgentError::Unavailable(_)));
    }

    #[tokio::test]
    async fn any_available_reflects_registered_agents() {
        let mut registry = CodingAgentRegistry::new();
        assert!(!registry.any_available().await);
        registry.register(stub(CodingAgentName::KiroCli, true));
        registry.priority = vec![CodingAgentName::KiroCli];
        assert!(registry.any_available().await);
    }
}
