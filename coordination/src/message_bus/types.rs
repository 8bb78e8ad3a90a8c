//! Message types carried on the agent message bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque message identifier.
pub type MessageId = String;

/// A message sent between agents, or broadcast to all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: MessageId,
    pub from: String,
    pub to: String,
    pub timestamp: DateTime<Utc>,
    pub payload: MessagePayload,
}

impl AgentMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// `type` discriminant, matching the field name the spec describes
    /// (`AgentMessage.type`) even though the payload itself is tagged.
    pub fn message_type(&self) -> &'static str {
        self.payload.type_name()
    }

    /// The `runId` this message is scoped to, if its payload carries one.
    /// `send` indexes history by this field when present.
    pub fn run_id(&self) -> Option<&str> {
        self.payload.run_id()
    }
}

/// Tagged payload variants. Matches the `type` enumeration in the data
/// model: `task_assign`, `task_result`, `quality_failure`, `approval_request`,
/// `approval_decision`, `escalation`, `broadcast`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    TaskAssign {
        run_id: String,
        ticket_id: String,
        instructions: String,
    },
    TaskResult {
        run_id: String,
        ticket_id: String,
        status: String,
        summary: String,
    },
    QualityFailure {
        run_id: String,
        ticket_id: String,
        failure_count: u32,
        errors: Vec<String>,
    },
    ApprovalRequest {
        run_id: String,
        workflow_id: String,
        phase: String,
    },
    ApprovalDecision {
        run_id: String,
        workflow_id: String,
        action: String,
        feedback: Option<String>,
    },
    Escalation {
        run_id: String,
        ticket_id: String,
        reason: String,
    },
    Broadcast {
        run_id: Option<String>,
        body: String,
    },
}

impl MessagePayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TaskAssign { .. } => "task_assign",
            Self::TaskResult { .. } => "task_result",
            Self::QualityFailure { .. } => "quality_failure",
            Self::ApprovalRequest { .. } => "approval_request",
            Self::ApprovalDecision { .. } => "approval_decision",
            Self::Escalation { .. } => "escalation",
            Self::Broadcast { .. } => "broadcast",
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        match self {
            Self::TaskAssign { run_id, .. }
            | Self::TaskResult { run_id, .. }
            | Self::QualityFailure { run_id, .. }
            | Self::ApprovalRequest { run_id, .. }
            | Self::ApprovalDecision { run_id, .. }
            | Self::Escalation { run_id, .. } => Some(run_id),
            Self::Broadcast { run_id, .. } => run_id.as_deref(),
        }
    }
}

/// The backend kind a `MessageBus` implementation identifies as, per
/// the polymorphism called for in the design notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusBackendKind {
    File,
    Sqlite,
    Redis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_matches_payload_tag() {
        let m = AgentMessage::new(
            "planner",
            "developer-1",
            MessagePayload::TaskAssign {
                run_id: "run-1".into(),
                ticket_id: "T-1".into(),
                instructions: "do the thing".into(),
            },
        );
        assert_eq!(m.message_type(), "task_assign");
        assert_eq!(m.run_id(), Some("run-1"));
    }

    #[test]
    fn broadcast_run_id_is_optional() {
        let m = AgentMessage::new(
            "quality_authority",
            "*",
            MessagePayload::Broadcast {
                run_id: None,
                body: "pause all workers".into(),
            },
        );
        assert_eq!(m.run_id(), None);
    }
}
