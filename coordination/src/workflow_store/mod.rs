//! State Store for the workflow/ticket/project/approval/knowledge/
//! performance data model (`domain`).
//!
//! The default and currently only backend is a flat JSON file tree under
//! `state/`, matching the persisted-state layout exactly: one file per
//! object, written write-temp-then-rename for atomicity. This is a
//! deliberately narrower scope than the ensemble-session `StateStore`
//! (`crate::state`, RocksDB-backed): that store's column families are
//! shaped around sessions/tasks/voting/context and are not repurposed
//! here, since doing so faithfully would mean redesigning its schema
//! rather than reusing it. A `heavy-state`-gated RocksDB backend for this
//! data model is a natural follow-up, not built in this pass — recorded
//! as a simplification rather than silently dropped.

mod json_store;

pub use json_store::JsonFileStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    ApprovalDecision, ChildTicket, GrandchildTicket, KnowledgeEntry, PerformanceRecord, Project,
    Workflow,
};

#[derive(Debug, Error)]
pub enum WorkflowStoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type WorkflowStoreResult<T> = Result<T, WorkflowStoreError>;

/// Backend-agnostic contract: atomic writes, latest-value reads,
/// reconstructible from disk on restart. Concurrent writers to the same
/// object are serialized by the caller (the Workflow Engine), not by the
/// store.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn put_workflow(&self, workflow: &Workflow) -> WorkflowStoreResult<()>;
    async fn get_workflow(&self, id: &str) -> WorkflowStoreResult<Option<Workflow>>;
    async fn list_workflows(&self) -> WorkflowStoreResult<Vec<Workflow>>;

    async fn put_child_ticket(&self, ticket: &ChildTicket) -> WorkflowStoreResult<()>;
    async fn get_child_ticket(&self, id: &str) -> WorkflowStoreResult<Option<ChildTicket>>;

    async fn put_grandchild_ticket(&self, ticket: &GrandchildTicket) -> WorkflowStoreResult<()>;
    async fn get_grandchild_ticket(&self, id: &str) -> WorkflowStoreResult<Option<GrandchildTicket>>;
    async fn list_grandchild_tickets(&self, parent_id: &str) -> WorkflowStoreResult<Vec<GrandchildTicket>>;

    async fn put_project(&self, project: &Project) -> WorkflowStoreResult<()>;
    async fn get_project(&self, id: &str) -> WorkflowStoreResult<Option<Project>>;
    async fn get_project_by_name(&self, name: &str) -> WorkflowStoreResult<Option<Project>>;
    async fn list_projects(&self) -> WorkflowStoreResult<Vec<Project>>;

    async fn append_approval(&self, decision: &ApprovalDecision) -> WorkflowStoreResult<()>;
    async fn get_approval_history(&self, workflow_id: &str) -> WorkflowStoreResult<Vec<ApprovalDecision>>;

    async fn put_knowledge_entry(&self, entry: &KnowledgeEntry) -> WorkflowStoreResult<()>;
    async fn list_knowledge_entries(&self) -> WorkflowStoreResult<Vec<KnowledgeEntry>>;

    async fn append_performance_record(&self, record: &PerformanceRecord) -> WorkflowStoreResult<()>;
    async fn list_performance_records(&self, agent_id: &str) -> WorkflowStoreResult<Vec<PerformanceRecord>>;
}
