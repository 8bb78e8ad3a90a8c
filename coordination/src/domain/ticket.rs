//! Ticket tree: one child per worker-type lane, each owning grandchild
//! leaves that are the actual unit of work the Worker Pool executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildLane {
    Research,
    Design,
    Developer,
    Test,
    Reviewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    InProgress,
    ReviewRequested,
    RevisionRequired,
    Completed,
    Failed,
    PrCreated,
}

impl TicketStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::PrCreated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactAction {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub action: ArtifactAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// A leaf unit of work. `quality_failures` is the per-grandchild retry
/// streak counter the Quality Gate's decision recommender reads — kept
/// here rather than on a shared workflow-level counter so concurrently
/// retrying siblings never interfere with each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrandchildTicket {
    pub id: String,
    pub parent_id: String,
    pub lane: ChildLane,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_result: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub quality_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GrandchildTicket {
    pub fn new(
        id: impl Into<String>,
        parent_id: impl Into<String>,
        lane: ChildLane,
        title: impl Into<String>,
        description: impl Into<String>,
        acceptance_criteria: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            lane,
            title: title.into(),
            description: description.into(),
            acceptance_criteria,
            status: TicketStatus::Pending,
            assignee: None,
            git_branch: None,
            artifacts: Vec::new(),
            review_result: None,
            depends_on: Vec::new(),
            quality_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One lane of a Workflow's decomposition; owns the grandchild leaves for
/// that lane. Completed iff every grandchild it owns is completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildTicket {
    pub id: String,
    pub workflow_id: String,
    pub lane: ChildLane,
    pub grandchild_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ChildTicket {
    pub fn new(id: impl Into<String>, workflow_id: impl Into<String>, lane: ChildLane) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            lane,
            grandchild_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// `true` iff every grandchild named by `grandchild_ids` appears in
    /// `all` with status `Completed`.
    pub fn is_completed(&self, all: &std::collections::HashMap<String, GrandchildTicket>) -> bool {
        !self.grandchild_ids.is_empty()
            && self.grandchild_ids.iter().all(|id| {
                all.get(id)
                    .map(|g| g.status == TicketStatus::Completed)
                    .unwrap_or(false)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ticket_starts_pending_with_zero_failures() {
        let t = GrandchildTicket::new("G-1", "C-1", ChildLane::Developer, "t", "d", vec![]);
        assert_eq!(t.status, TicketStatus::Pending);
        assert_eq!(t.quality_failures, 0);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TicketStatus::Completed.is_terminal());
        assert!(TicketStatus::Failed.is_terminal());
        assert!(TicketStatus::PrCreated.is_terminal());
        assert!(!TicketStatus::InProgress.is_terminal());
    }

    #[test]
    fn child_completed_only_when_every_grandchild_completed() {
        let mut child = ChildTicket::new("C-1", "W-1", ChildLane::Developer);
        child.grandchild_ids = vec!["G-1".into(), "G-2".into()];

        let mut all = std::collections::HashMap::new();
        let mut g1 = GrandchildTicket::new("G-1", "C-1", ChildLane::Developer, "t", "d", vec![]);
        g1.status = TicketStatus::Completed;
        let g2 = GrandchildTicket::new("G-2", "C-1", ChildLane::Developer, "t", "d", vec![]);
        all.insert("G-1".to_string(), g1);
        all.insert("G-2".to_string(), g2);

        assert!(!child.is_completed(&all));
        all.get_mut("G-2").unwrap().status = TicketStatus::Completed;
        assert!(child.is_completed(&all));
    }
}
