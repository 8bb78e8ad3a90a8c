//! Approval Gate: blocks a workflow on a typed decision from an external
//! approver. `request_approval` returns a future that resolves only when a
//! matching `submit_decision` call arrives; at most one approval may be
//! pending per workflow at a time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

use crate::domain::{ApprovalDecision, ApprovalOutcome, Phase};
use crate::workflow_store::{WorkflowStore, WorkflowStoreError};

#[derive(Debug, Error)]
pub enum ApprovalGateError {
    #[error("workflow {0} already has a pending approval")]
    AlreadyPending(String),
    /// Exact bilingual contract string from the approval protocol.
    #[error("not awaiting approval (承認待ちではありません): {0}")]
    NotPending(String),
    #[error("approval for workflow {0} was cancelled")]
    Cancelled(String),
    #[error("state store error: {0}")]
    Store(#[from] WorkflowStoreError),
}

pub type ApprovalGateResult<T> = Result<T, ApprovalGateError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResolution {
    pub action: ApprovalOutcome,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub workflow_id: String,
    pub phase: Phase,
    pub proposal: Value,
    pub requested_at: DateTime<Utc>,
}

struct PendingEntry {
    phase: Phase,
    proposal: Value,
    requested_at: DateTime<Utc>,
    sender: oneshot::Sender<ApprovalResolution>,
}

pub struct ApprovalGate<S: WorkflowStore> {
    store: Arc<S>,
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl<S: WorkflowStore> ApprovalGate<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store, pending: Mutex::new(HashMap::new()) }
    }

    /// Resolves only on a matching `submit_decision`, or with
    /// [`ApprovalGateError::Cancelled`] if [`Self::cancel`] is called first.
    pub async fn request_approval(
        &self,
        workflow_id: &str,
        phase: Phase,
        proposal: Value,
    ) -> ApprovalGateResult<ApprovalResolution> {
        let rx = {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(workflow_id) {
                return Err(ApprovalGateError::AlreadyPending(workflow_id.to_string()));
            }
            let (tx, rx) = oneshot::channel();
            pending.insert(
                workflow_id.to_string(),
                PendingEntry { phase, proposal, requested_at: Utc::now(), sender: tx },
            );
            rx
        };

        rx.await.map_err(|_| ApprovalGateError::Cancelled(workflow_id.to_string()))
    }

    /// Resolves the pending approval for `workflow_id`, verbatim (action and
    /// feedback are carried through unchanged), and appends it to approval
    /// history before settling the waiting `request_approval` call.
    pub async fn submit_decision(
        &self,
        workflow_id: &str,
        action: ApprovalOutcome,
        feedback: Option<String>,
    ) -> ApprovalGateResult<()> {
        let entry = {
            let mut pending = self.pending.lock().await;
            pending
                .remove(workflow_id)
                .ok_or_else(|| ApprovalGateError::NotPending(workflow_id.to_string()))?
        };

        let decision = ApprovalDecision {
            workflow_id: workflow_id.to_string(),
            phase: entry.phase,
            action,
            feedback: feedback.clone(),
            decided_at: Utc::now(),
        };
        self.store.append_approval(&decision).await?;

        // The receiver may already be gone if the waiter was dropped; that
        // is not an error for the submitter.
        let _ = entry.sender.send(ApprovalResolution { action, feedback });
        Ok(())
    }

    /// Settles a pending approval with [`ApprovalGateError::Cancelled`]
    /// without touching approval history, for workflow cancellation.
    pub async fn cancel(&self, workflow_id: &str) -> bool {
        self.pending.lock().await.remove(workflow_id).is_some()
    }

    pub async fn is_waiting_approval(&self, workflow_id: &str) -> bool {
        self.pending.lock().await.contains_key(workflow_id)
    }

    pub async fn get_pending_approvals(&self) -> Vec<PendingApproval> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|(workflow_id, entry)| PendingApproval {
                workflow_id: workflow_id.clone(),
                phase: entry.phase,
                proposal: entry.proposal.clone(),
                requested_at: entry.requested_at,
            })
            .collect()
    }

    pub async fn get_approval_history(&self, workflow_id: &str) -> ApprovalGateResult<Vec<ApprovalDecision>> {
        Ok(self.store.get_approval_history(workflow_id).await?)
    }
}
