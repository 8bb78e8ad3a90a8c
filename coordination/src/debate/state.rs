//! Debate state machine — phases, transitions, and session tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a debate session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebatePhase {
    /// Session created but not started.
    Idle,
    /// Coder is producing/revising code.
    CoderTurn,
    /// Reviewer is evaluating the code.
    ReviewerTurn,
    /// Consensus reached — debate succeeded.
    Resolved,
    /// Max rounds exhausted without consensus.
    Deadlocked,
    /// Escalated to arbitration (ensemble or human).
    Escalated,
    /// Aborted by policy or intervention.
    Aborted,
}

impl DebatePhase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::Deadlocked | Self::Escalated | Self::Aborted
        )
    }

    /// Whether this phase allows transition to a new phase.
    pub fn can_transition(self) -> bool {
        !self.is_terminal()
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [DebatePhase] {
        match self {
            Self::Idle => &[Self::CoderTurn, Self::Aborted],
            Self::CoderTurn => &[Self::ReviewerTurn, Self::Aborted],
            Self::ReviewerTurn => &[
                Self::CoderTurn,
                Self::Resolved,
                Self::Deadlocked,
                Self::Escalated,
                Self::Aborted,
            ],
            Self::Resolved | Self::Deadlocked | Self::Escalated | Self::Aborted => &[],
        }
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::CoderTurn => write!(f, "coder_turn"),
            Self::ReviewerTurn => write!(f, "reviewer_turn"),
            Self::Resolved => write!(f, "resolved"),
            Self::Deadlocked => write!(f, "deadlocked"),
            Self::Escalated => write!(f, "escalated"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Role of a participant in the debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantRole {
    /// Code producer.
    Coder,
    /// Code evaluator.
    Reviewer,
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coder => write!(f, "coder"),
            Self::Reviewer => write!(f, "reviewer"),
        }
    }
}

/// Record of a single debate round (coder turn + reviewer turn).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round number (1-indexed).
    pub round: u32,
    /// Coder's output for this round.
    pub coder_output: String,
    /// Reviewer's verdict for this round.
    pub reviewer_verdict: String,
    /// Whether the reviewer approved the code.
    pub approved: bool,
    /// Specific issues raised by the reviewer.
    pub issues: Vec<String>,
    /// Round duration in milliseconds.
    pub duration_ms: u64,
    /// When this round started.
    pub started_at: DateTime<Utc>,
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTransition {
    /// Previous phase.
    pub from: DebatePhase,
    /// New phase.
    pub to: DebatePhase,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
    /// Reason for the transition.
    pub reason: String,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}

/// A debate session tracking state and history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    /// Unique session identifier.
    pub id: String,
    /// Current phase.
    pub phase: DebatePhase,
    /// Current round number.
    pub current_round: u32,
    /// Maximum rounds allowed.
    pub max_rounds: u32,
    /// Round history.
    pub rounds: Vec<RoundRecord>,
    /// Transition history.
    pub transitions: Vec<DebateTransition>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Issue/task being debated.
    pub issue_id: String,
    /// Diff or code being debated.
    pub subject: String,
}

impl DebateSession {
    /// Create a new debate session.
    pub fn new(id: &str, issue_id: &str, subject: &str, max_rounds: u32) -> Self {
        Self {
            id: id.to_string(),
            phase: DebatePhase::Idle,
            current_round: 0,
            max_rounds,
            rounds: Vec::new(),
            transitions: Vec::new(),
            created_at: Utc::now(),
            issue_id: issue_id.to_string(),
            subject: subject.to_string(),
        }
    }

    /// Transition to a new phase with a reason.
    pub fn transition(&mut self, to: DebatePhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }

        self.transitions.push(DebateTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;

        // Increment round when entering CoderTurn
        if to == DebatePhase::CoderTurn {
            self.current_round += 1;
        }

        Ok(())
    }

    /// Start the debate (Idle → CoderTurn).
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(DebatePhase::CoderTurn, "debate started")
    }

    /// Record a complete round and transition.
    pub fn record_round(&mut self, record: RoundRecord) {
        self.rounds.push(record);
    }

    /// Whether the debate has ended.
    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Whether more rounds are available.
    pub fn has_rounds_remaining(&self) -> bool {
        self.current_round < self.max_rounds
    }

    /// Total elapsed rounds.
    pub fn elapsed_rounds(&self) -> u32 {
        self.current_round
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] round {}/{} | {} rounds recorded | issue={}",
            self.phase,
            self.current_round,
            self.max_rounds,
            self.rounds.len(),
            self.issue_id
        )
    }
}
