//! Workflow, Project, approval, and knowledge-base records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Meeting,
    Proposal,
    Approval,
    Execution,
    Review,
    Delivery,
    Retrospective,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub project_id: String,
    pub instruction: String,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub child_tickets: Vec<String>,
    pub metadata: WorkflowMetadata,
}

impl Workflow {
    pub fn new(workflow_id: impl Into<String>, project_id: impl Into<String>, instruction: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            project_id: project_id.into(),
            instruction: instruction.into(),
            phase: Phase::Meeting,
            created_at: now,
            updated_at: now,
            child_tickets: Vec::new(),
            metadata: WorkflowMetadata::default(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("invalid git url: {0}")]
    InvalidGitUrl(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub git_url: String,
    pub default_branch: String,
    pub integration_branch: String,
    pub work_dir: String,
    pub base_branch: String,
    pub agent_branch: String,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl Project {
    /// `scheme://rest` (http[s]/ssh) or SCP-like `user@host:path` with a
    /// non-empty path and no whitespace.
    pub fn validate_git_url(url: &str) -> Result<(), ProjectError> {
        let invalid = || ProjectError::InvalidGitUrl(url.to_string());
        if url.contains(char::is_whitespace) || url.is_empty() {
            return Err(invalid());
        }
        if url.starts_with("https://") || url.starts_with("http://") || url.starts_with("ssh://") {
            let rest = url.splitn(2, "://").nth(1).unwrap_or("");
            return if rest.is_empty() { Err(invalid()) } else { Ok(()) };
        }
        if let Some((_, path)) = url.split_once('@').and_then(|(user, rest)| {
            rest.split_once(':').map(|(host, path)| (format!("{user}@{host}"), path))
        }) {
            return if path.is_empty() { Err(invalid()) } else { Ok(()) };
        }
        Err(invalid())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approve,
    RequestRevision,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub workflow_id: String,
    pub phase: Phase,
    pub action: ApprovalOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeCategory {
    BestPractice,
    FailureCase,
    TechnicalNote,
    ProcessImprovement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub title: String,
    pub category: KnowledgeCategory,
    pub content: String,
    pub tags: Vec<String>,
    pub related_workflows: Vec<String>,
    pub author_agent_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub agent_id: String,
    pub task_id: String,
    pub task_category: String,
    pub success: bool,
    pub quality_score: u8,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_patterns: Option<Vec<String>>,
}
