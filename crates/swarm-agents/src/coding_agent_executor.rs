//! [`TicketExecutor`] backed by the Coding-Agent Registry — the bridge
//! between the Worker Pool and an external coding-agent CLI
//! (`claude`, `opencode`, `kiro`).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use swarm_core::{Artifact, ArtifactAction, CodingAgentName, CodingAgentRegistry, CodingAgentRequest, GrandchildTicket};
use tracing::{info, warn};

use crate::worker_pool::{TicketExecutor, WorkerOutcome};

/// Drives a [`GrandchildTicket`] through whichever coding agent the
/// registry selects, feeding it a prompt built from the ticket's
/// description and acceptance criteria.
pub struct CodingAgentExecutor {
    registry: Arc<CodingAgentRegistry>,
    explicit_agent: Option<CodingAgentName>,
    timeout_seconds: Option<u64>,
}

impl CodingAgentExecutor {
    pub fn new(registry: Arc<CodingAgentRegistry>) -> Self {
        Self { registry, explicit_agent: None, timeout_seconds: Some(600) }
    }

    pub fn with_agent(mut self, agent: CodingAgentName) -> Self {
        self.explicit_agent = Some(agent);
        self
    }

    fn build_prompt(ticket: &GrandchildTicket) -> String {
        let mut prompt = format!("# {}\n\n{}\n", ticket.title, ticket.description);
        if !ticket.acceptance_criteria.is_empty() {
            prompt.push_str("\n## Acceptance criteria\n");
            for criterion in &ticket.acceptance_criteria {
                prompt.push_str(&format!("- {criterion}\n"));
            }
        }
        if let Some(feedback) = &ticket.review_result {
            prompt.push_str(&format!("\n## Revision feedback\n{feedback}\n"));
        }
        prompt
    }
}

#[async_trait]
impl TicketExecutor for CodingAgentExecutor {
    async fn execute(&self, ticket: &GrandchildTicket, workspace: &Path) -> WorkerOutcome {
        let agent = match self.registry.select(self.explicit_agent).await {
            Ok(agent) => agent,
            Err(e) => {
                warn!(ticket_id = %ticket.id, "no coding agent available: {e}");
                return WorkerOutcome {
                    artifacts: Vec::new(),
                    commit_message: String::new(),
                    errors: vec![format!("coding agent unavailable: {e}")],
                    conversation_turns: 0,
                    tokens_used: 0,
                };
            }
        };

        let prompt = Self::build_prompt(ticket);
        info!(ticket_id = %ticket.id, agent = agent.display_name(), "dispatching ticket to coding agent");

        let request = CodingAgentRequest {
            working_directory: workspace.to_path_buf(),
            prompt,
            timeout_seconds: self.timeout_seconds,
            env: Vec::new(),
        };

        match agent.execute(request).await {
            Ok(response) if response.succeeded() => WorkerOutcome {
                artifacts: vec![Artifact {
                    path: ".".to_string(),
                    action: ArtifactAction::Modified,
                    diff: None,
                }],
                commit_message: format!("{:?}: {}", ticket.lane, ticket.title),
                errors: Vec::new(),
                conversation_turns: 1,
                tokens_used: 0,
            },
            Ok(response) => WorkerOutcome {
                artifacts: Vec::new(),
                commit_message: String::new(),
                errors: vec![format!(
                    "{} exited with {:?}: {}",
                    agent.display_name(),
                    response.exit_code,
                    response.stderr
                )],
                conversation_turns: 1,
                tokens_used: 0,
            },
            Err(e) => WorkerOutcome {
                artifacts: Vec::new(),
                commit_message: String::new(),
                errors: vec![format!("{} failed: {e}", agent.display_name())],
                conversation_turns: 1,
                tokens_used: 0,
            },
        }
    }
}
