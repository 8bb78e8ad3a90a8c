//! Meeting Coordinator: synthesizes multi-role "meeting minutes" artifacts
//! that the Workflow Engine attaches to the meeting/proposal/retrospective
//! phases. Adapts the Council's multi-role-synthesis shape
//! ([`crate::council`]) to a fixed, auditable minutes document instead of
//! a free-form decision.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::ChildLane;
use crate::lane_select::select_lanes;

#[derive(Debug, Error)]
pub enum MeetingError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type MeetingResult<T> = Result<T, MeetingError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgendaStatus {
    Open,
    Concluded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaItem {
    pub id: String,
    pub title: String,
    pub status: AgendaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub speaker: String,
    pub agenda_item_id: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub agenda_item_id: String,
    pub decision: String,
    pub decided_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub description: String,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agenda_item_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingMinutes {
    pub meeting_id: String,
    pub workflow_id: String,
    pub facilitator: String,
    pub participants: Vec<String>,
    pub agenda: Vec<AgendaItem>,
    pub statements: Vec<Statement>,
    pub decisions: Vec<Decision>,
    pub action_items: Vec<ActionItem>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

fn lane_role(lane: ChildLane) -> &'static str {
    match lane {
        ChildLane::Research => "research",
        ChildLane::Design => "design",
        ChildLane::Developer => "developer",
        ChildLane::Test => "test",
        ChildLane::Reviewer => "reviewer",
    }
}

fn agenda_title(lane: ChildLane) -> &'static str {
    match lane {
        ChildLane::Research => "Research approach",
        ChildLane::Design => "Design architecture",
        ChildLane::Developer => "Implementation plan",
        ChildLane::Test => "Test strategy",
        ChildLane::Reviewer => "Review criteria",
    }
}

pub struct MeetingCoordinator {
    runtime_root: PathBuf,
}

impl MeetingCoordinator {
    pub fn new(runtime_root: impl Into<PathBuf>) -> Self {
        Self { runtime_root: runtime_root.into() }
    }

    /// One agenda item per lane the instruction implies (always at least
    /// `developer`); every non-facilitator participant speaks on every
    /// item, the facilitator concludes each with a summary and a decision.
    pub async fn convene_meeting(
        &self,
        workflow_id: &str,
        instruction: &str,
        facilitator_id: &str,
    ) -> MeetingResult<MeetingMinutes> {
        let started_at = Utc::now();
        let meeting_id = Uuid::new_v4().to_string();

        let lanes = select_lanes(instruction, &[]);
        let participants: Vec<String> = lanes.iter().map(|l| lane_role(*l).to_string()).collect();

        let mut agenda: Vec<AgendaItem> = lanes
            .iter()
            .enumerate()
            .map(|(i, lane)| AgendaItem {
                id: format!("agenda-{}", i + 1),
                title: agenda_title(*lane).to_string(),
                status: AgendaStatus::Open,
            })
            .collect();

        let mut statements = Vec::new();
        let mut decisions = Vec::new();
        let mut action_items = Vec::new();

        for item in &mut agenda {
            for participant in &participants {
                statements.push(Statement {
                    speaker: participant.clone(),
                    agenda_item_id: item.id.clone(),
                    content: format!(
                        "{participant}: regarding \"{}\", proposed approach for: {instruction}",
                        item.title
                    ),
                    at: Utc::now(),
                });
            }

            statements.push(Statement {
                speaker: facilitator_id.to_string(),
                agenda_item_id: item.id.clone(),
                content: format!("Summary for \"{}\": consensus reached, moving to next step.", item.title),
                at: Utc::now(),
            });
            item.status = AgendaStatus::Concluded;

            decisions.push(Decision {
                agenda_item_id: item.id.clone(),
                decision: format!("Proceed with \"{}\"", item.title),
                decided_by: facilitator_id.to_string(),
            });

            action_items.push(ActionItem {
                description: format!("Execute \"{}\"", item.title),
                owner: participants.first().cloned().unwrap_or_else(|| facilitator_id.to_string()),
                agenda_item_id: Some(item.id.clone()),
            });
        }

        let minutes = MeetingMinutes {
            meeting_id,
            workflow_id: workflow_id.to_string(),
            facilitator: facilitator_id.to_string(),
            participants,
            agenda,
            statements,
            decisions,
            action_items,
            started_at,
            ended_at: Utc::now(),
        };

        self.persist(&minutes).await?;
        Ok(minutes)
    }

    async fn persist(&self, minutes: &MeetingMinutes) -> MeetingResult<()> {
        let dir = self.runtime_root.join(&minutes.workflow_id).join("meeting-minutes");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| MeetingError::Io { path: dir.clone(), source })?;

        let path = dir.join(format!("{}.json", minutes.meeting_id));
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(minutes)?;
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|source| MeetingError::Io { path: tmp.clone(), source })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| MeetingError::Io { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn convene_meeting_includes_facilitator_and_developer() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = MeetingCoordinator::new(dir.path());
        let minutes = coordinator
            .convene_meeting("wf-1", "just write some code", "planner-1")
            .await
            .unwrap();

        assert!(minutes.participants.contains(&"developer".to_string()));
        assert!(minutes.agenda.iter().all(|a| a.status == AgendaStatus::Concluded));
        assert!(!minutes.decisions.is_empty());

        let path = dir.path().join("wf-1/meeting-minutes").join(format!("{}.json", minutes.meeting_id));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn every_participant_speaks_on_every_agenda_item() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = MeetingCoordinator::new(dir.path());
        let minutes = coordinator
            .convene_meeting("wf-2", "research and design the new api, then test it", "planner-1")
            .await
            .unwrap();

        assert!(minutes.participants.len() > 1);
        for item in &minutes.agenda {
            for participant in &minutes.participants {
                assert!(minutes
                    .statements
                    .iter()
                    .any(|s| s.agenda_item_id == item.id && s.speaker == *participant));
            }
            assert!(minutes.decisions.iter().any(|d| d.agenda_item_id == item.id));
        }
    }
}
