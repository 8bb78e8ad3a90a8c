//! Flat JSON file backend: atomic write-temp-then-rename, one file per
//! object, matching the layout in the persisted-state contract exactly.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::{WorkflowStore, WorkflowStoreError, WorkflowStoreResult};
use crate::domain::{
    ApprovalDecision, ChildTicket, GrandchildTicket, KnowledgeEntry, PerformanceRecord, Project,
    Workflow,
};

pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn write<T: Serialize + Sync>(&self, rel_path: &str, value: &T) -> WorkflowStoreResult<()> {
        let path = self.root.join(rel_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| WorkflowStoreError::Io { path: parent.to_path_buf(), source })?;
        }
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|source| WorkflowStoreError::Io { path: tmp.clone(), source })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| WorkflowStoreError::Io { path, source })?;
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, rel_path: &str) -> WorkflowStoreResult<Option<T>> {
        let path = self.root.join(rel_path);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(WorkflowStoreError::Io { path, source }),
        }
    }

    async fn list_dir<T: DeserializeOwned>(&self, rel_dir: &str) -> WorkflowStoreResult<Vec<T>> {
        let dir = self.root.join(rel_dir);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(WorkflowStoreError::Io { path: dir, source }),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| WorkflowStoreError::Io { path: dir.clone(), source })?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| WorkflowStoreError::Io { path, source })?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    async fn append_line<T: Serialize + Sync>(&self, rel_path: &str, value: &T) -> WorkflowStoreResult<()> {
        let path = self.root.join(rel_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| WorkflowStoreError::Io { path: parent.to_path_buf(), source })?;
        }
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| WorkflowStoreError::Io { path: path.clone(), source })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| WorkflowStoreError::Io { path, source })
    }

    async fn read_lines<T: DeserializeOwned>(&self, rel_path: &str) -> WorkflowStoreResult<Vec<T>> {
        let path = self.root.join(rel_path);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(WorkflowStoreError::Io { path, source }),
        };
        let mut out = Vec::new();
        for line in String::from_utf8_lossy(&bytes).lines() {
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(line)?);
        }
        Ok(out)
    }
}

fn project_path_for_name(name: &str) -> String {
    format!("projects-by-name/{name}.json")
}

#[async_trait]
impl WorkflowStore for JsonFileStore {
    async fn put_workflow(&self, workflow: &Workflow) -> WorkflowStoreResult<()> {
        self.write(&format!("workflows/{}.json", workflow.workflow_id), workflow).await
    }

    async fn get_workflow(&self, id: &str) -> WorkflowStoreResult<Option<Workflow>> {
        self.read(&format!("workflows/{id}.json")).await
    }

    async fn list_workflows(&self) -> WorkflowStoreResult<Vec<Workflow>> {
        self.list_dir("workflows").await
    }

    async fn put_child_ticket(&self, ticket: &ChildTicket) -> WorkflowStoreResult<()> {
        self.write(&format!("tickets/{}.json", ticket.id), ticket).await
    }

    async fn get_child_ticket(&self, id: &str) -> WorkflowStoreResult<Option<ChildTicket>> {
        self.read(&format!("tickets/{id}.json")).await
    }

    async fn put_grandchild_ticket(&self, ticket: &GrandchildTicket) -> WorkflowStoreResult<()> {
        self.write(&format!("tickets/{}.json", ticket.id), ticket).await
    }

    async fn get_grandchild_ticket(&self, id: &str) -> WorkflowStoreResult<Option<GrandchildTicket>> {
        self.read(&format!("tickets/{id}.json")).await
    }

    async fn list_grandchild_tickets(&self, parent_id: &str) -> WorkflowStoreResult<Vec<GrandchildTicket>> {
        let all: Vec<GrandchildTicket> = self.list_dir("tickets").await?;
        Ok(all.into_iter().filter(|t| t.parent_id == parent_id).collect())
    }

    async fn put_project(&self, project: &Project) -> WorkflowStoreResult<()> {
        self.write(&format!("projects/{}.json", project.id), project).await?;
        self.write(&project_path_for_name(&project.name), project).await
    }

    async fn get_project(&self, id: &str) -> WorkflowStoreResult<Option<Project>> {
        self.read(&format!("projects/{id}.json")).await
    }

    async fn get_project_by_name(&self, name: &str) -> WorkflowStoreResult<Option<Project>> {
        self.read(&project_path_for_name(name)).await
    }

    async fn list_projects(&self) -> WorkflowStoreResult<Vec<Project>> {
        self.list_dir("projects").await
    }

    async fn append_approval(&self, decision: &ApprovalDecision) -> WorkflowStoreResult<()> {
        self.append_line(&format!("approvals/{}.jsonl", decision.workflow_id), decision).await
    }

    async fn get_approval_history(&self, workflow_id: &str) -> WorkflowStoreResult<Vec<ApprovalDecision>> {
        self.read_lines(&format!("approvals/{workflow_id}.jsonl")).await
    }

    async fn put_knowledge_entry(&self, entry: &KnowledgeEntry) -> WorkflowStoreResult<()> {
        self.write(&format!("knowledge-base/entries/{}.json", entry.id), entry).await
    }

    async fn list_knowledge_entries(&self) -> WorkflowStoreResult<Vec<KnowledgeEntry>> {
        self.list_dir("knowledge-base/entries").await
    }

    async fn append_performance_record(&self, record: &PerformanceRecord) -> WorkflowStoreResult<()> {
        self.append_line(&format!("performance/{}.jsonl", record.agent_id), record).await
    }

    async fn list_performance_records(&self, agent_id: &str) -> WorkflowStoreResult<Vec<PerformanceRecord>> {
        self.read_lines(&format!("performance/{agent_id}.jsonl")).await
    }
}

impl JsonFileStore {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChildLane, GrandchildTicket, Workflow};

    #[tokio::test]
    async fn workflow_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let workflow = Workflow::new("W-1", "P-1", "build the thing");
        store.put_workflow(&workflow).await.unwrap();

        let loaded = store.get_workflow("W-1").await.unwrap().unwrap();
        assert_eq!(loaded.workflow_id, "W-1");
        assert_eq!(loaded.instruction, "build the thing");
    }

    #[tokio::test]
    async fn missing_workflow_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.get_workflow("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn grandchild_tickets_filter_by_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let g1 = GrandchildTicket::new("G-1", "C-1", ChildLane::Developer, "a", "b", vec![]);
        let g2 = GrandchildTicket::new("G-2", "C-2", ChildLane::Developer, "a", "b", vec![]);
        store.put_grandchild_ticket(&g1).await.unwrap();
        store.put_grandchild_ticket(&g2).await.unwrap();

        let under_c1 = store.list_grandchild_tickets("C-1").await.unwrap();
        assert_eq!(under_c1.len(), 1);
        assert_eq!(under_c1[0].id, "G-1");
    }

    #[tokio::test]
    async fn approval_history_is_append_only() {
        use crate::domain::{ApprovalDecision, ApprovalOutcome, Phase};
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        let d1 = ApprovalDecision {
            workflow_id: "W-1".into(),
            phase: Phase::Approval,
            action: ApprovalOutcome::RequestRevision,
            feedback: Some("needs work".into()),
            decided_at: chrono::Utc::now(),
        };
        store.append_approval(&d1).await.unwrap();

        let d2 = ApprovalDecision {
            action: ApprovalOutcome::Approve,
            feedback: Some("looks good".into()),
            ..d1.clone()
        };
        store.append_approval(&d2).await.unwrap();

        let history = store.get_approval_history("W-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, ApprovalOutcome::RequestRevision);
        assert_eq!(history[1].action, ApprovalOutcome::Approve);
    }
}
