//! Workflow Engine — drives a [`Workflow`] through its phase state machine
//! by calling the already-implemented leaf components in sequence:
//! [`TaskDecomposer::decompose`] (proposal), [`ApprovalGate`] (approval and
//! quality-escalation gates), [`WorkerPool::submit`] per grandchild ticket
//! (execution), [`recommend_decision`] (review, looping on retry/reassign),
//! [`GitCoordinator::merge_to_agent_branch`] (delivery), and
//! [`MeetingCoordinator`] (meeting and retrospective).
//!
//! Phase transitions go through the same guard-table discipline
//! [`crate::state_machine::is_legal_transition`] uses for
//! [`crate::state_machine::OrchestratorState`]: a fixed table of legal
//! `(from, to)` pairs, checked before every mutation, with every
//! transition persisted through the State Store immediately.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use swarm_core::{
    recommend_decision, AgentMessage, ApprovalGate, ApprovalOutcome, ChildLane,
    CodingAgentRegistry, GateDecision, GitCoordinator, GitCoordinatorError, GrandchildTicket,
    MeetingCoordinator, MeetingError, MessageBus, MessagePayload, Phase, Project, QualityGate,
    QualityGateConfig, TicketStatus, Workflow, WorkflowStore, WorkflowStoreError,
};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::task_decomposer::{DecomposerError, TaskDecomposer};
use crate::worker_pool::{ExecutionStatus, TicketExecutor, WorkerPool, WorkerPoolError};

/// Legal `(from, to)` phase transitions (spec.md §4.12's diagram), checked
/// before every mutation the same way
/// [`crate::state_machine::is_legal_transition`] guards orchestrator
/// states.
pub fn is_legal_transition(from: Phase, to: Phase) -> bool {
    use Phase::*;
    matches!(
        (from, to),
        (Meeting, Proposal)
            | (Proposal, Approval)
            | (Approval, Proposal) // revision requested
            | (Approval, Execution) // approved
            | (Approval, Failed) // rejected
            | (Execution, Review)
            | (Execution, Approval) // quality-gate escalation to quality_authority
            | (Execution, Failed)
            | (Review, Delivery)
            | (Review, Execution) // revision requested at delivery gate
            | (Review, Failed)
            | (Delivery, Retrospective)
            | (Delivery, Failed)
            | (Retrospective, Completed)
    )
}

#[derive(Debug, Error)]
pub enum WorkflowEngineError {
    #[error("illegal phase transition {from:?} -> {to:?}")]
    IllegalTransition { from: Phase, to: Phase },
    #[error("neither the LLM adapter nor any coding agent is available")]
    AiUnavailable,
    #[error("decomposer error: {0}")]
    Decomposer(#[from] DecomposerError),
    #[error("worker pool error: {0}")]
    WorkerPool(#[from] WorkerPoolError),
    #[error("approval gate error: {0}")]
    Approval(#[from] swarm_core::ApprovalGateError),
    #[error("git error: {0}")]
    Git(#[from] GitCoordinatorError),
    #[error("meeting error: {0}")]
    Meeting(#[from] MeetingError),
    #[error("state store error: {0}")]
    Store(#[from] WorkflowStoreError),
}

pub type WorkflowEngineResult<T> = Result<T, WorkflowEngineError>;

#[derive(Debug, Clone)]
pub struct WorkflowEngineConfig {
    /// `from`/`to` identity this engine uses on the Message Bus.
    pub engine_agent_id: String,
    pub facilitator_id: String,
    /// Consecutive quality-gate failures for one grandchild before
    /// escalating to the Approval Gate under role `quality_authority`,
    /// matching `recommend_decision`'s 1-retry/2-reassign/3-escalate
    /// thresholds.
    pub max_quality_retries: u32,
}

impl Default for WorkflowEngineConfig {
    fn default() -> Self {
        Self {
            engine_agent_id: "workflow-engine".to_string(),
            facilitator_id: "workflow-engine".to_string(),
            max_quality_retries: 3,
        }
    }
}

/// Everything one `run` call needs beyond the `Workflow`/`Project` pair:
/// the leaf components it drives, and the per-lane executor factory the
/// Worker Pool uses to actually mutate source files.
pub struct WorkflowEngine<S: WorkflowStore> {
    store: Arc<S>,
    approval_gate: Arc<ApprovalGate<S>>,
    meeting: MeetingCoordinator,
    decomposer: TaskDecomposer,
    worker_pool: WorkerPool,
    config: WorkflowEngineConfig,
}

impl<S: WorkflowStore + 'static> WorkflowEngine<S> {
    pub fn new(
        store: Arc<S>,
        approval_gate: Arc<ApprovalGate<S>>,
        meeting: MeetingCoordinator,
        worker_pool: WorkerPool,
        config: WorkflowEngineConfig,
    ) -> Self {
        Self { store, approval_gate, meeting, decomposer: TaskDecomposer::new(), worker_pool, config }
    }

    async fn transition(&self, workflow: &mut Workflow, to: Phase) -> WorkflowEngineResult<()> {
        if !is_legal_transition(workflow.phase, to) {
            return Err(WorkflowEngineError::IllegalTransition { from: workflow.phase, to });
        }
        info!(workflow_id = %workflow.workflow_id, from = ?workflow.phase, to = ?to, "phase transition");
        workflow.phase = to;
        workflow.touch();
        self.store.put_workflow(workflow).await?;
        Ok(())
    }

    /// spec.md §4.12's "AI availability" gate: admits the task if either
    /// the LLM adapter is up, or any coding agent is — refuses only when
    /// both are down.
    pub async fn ai_available(llm_available: bool, coding_agents: &CodingAgentRegistry) -> bool {
        llm_available || coding_agents.any_available().await
    }

    /// Drives `workflow` from its current phase (normally [`Phase::Meeting`])
    /// through to [`Phase::Completed`] or [`Phase::Failed`], persisting
    /// state after every transition. `executor_for_lane` selects the
    /// [`TicketExecutor`] (coding-agent adapter or LLM chat loop) each
    /// grandchild's lane should run under; `bus`, when given, receives an
    /// `ApprovalRequest`/`Escalation` notification at each gate.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        workflow: &mut Workflow,
        project: &Project,
        llm_available: bool,
        coding_agents: &CodingAgentRegistry,
        executor_for_lane: &(dyn Fn(ChildLane) -> Arc<dyn TicketExecutor> + Send + Sync),
        quality_gate: Arc<QualityGate>,
        quality_gate_config: QualityGateConfig,
        bus: Option<Arc<dyn MessageBus>>,
    ) -> WorkflowEngineResult<()> {
        let span = info_span!("workflow_engine.run", workflow_id = %workflow.workflow_id);
        async {
            self.run_meeting(workflow).await?;

            let mut grandchildren = loop {
                match self.run_proposal_and_approval(workflow, &bus).await? {
                    ProposalOutcome::Approved(grandchildren) => break grandchildren,
                    ProposalOutcome::Revise => continue,
                    ProposalOutcome::Failed => return Ok(()),
                }
            };

            if !Self::ai_available(llm_available, coding_agents).await {
                self.transition(workflow, Phase::Failed).await?;
                return Err(WorkflowEngineError::AiUnavailable);
            }

            self.transition(workflow, Phase::Execution).await?;
            let executed = self
                .run_execution(workflow, project, &mut grandchildren, executor_for_lane, &quality_gate, &quality_gate_config, &bus)
                .await?;
            if !executed {
                return Ok(()); // workflow already failed inside run_execution
            }

            self.transition(workflow, Phase::Review).await?;
            self.transition(workflow, Phase::Delivery).await?;
            self.run_delivery(workflow, project, &grandchildren)?;

            self.transition(workflow, Phase::Retrospective).await?;
            self.run_retrospective(workflow).await?;

            self.transition(workflow, Phase::Completed).await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn run_meeting(&self, workflow: &mut Workflow) -> WorkflowEngineResult<()> {
        let _minutes = self
            .meeting
            .convene_meeting(&workflow.workflow_id, &workflow.instruction, &self.config.facilitator_id)
            .await?;
        self.transition(workflow, Phase::Proposal).await
    }

    /// Decomposes the instruction, requests approval, and either returns
    /// the approved grandchild tree (`Some(Some(..))`), signals a
    /// revision loop (`Some(None)`), or fails the workflow outright.
    async fn run_proposal_and_approval(
        &self,
        workflow: &mut Workflow,
        bus: &Option<Arc<dyn MessageBus>>,
    ) -> WorkflowEngineResult<ProposalOutcome> {
        let decomposition = self.decomposer.decompose(&workflow.workflow_id, &workflow.instruction, &[], &[])?;
        for child in &decomposition.children {
            self.store.put_child_ticket(child).await?;
            if !workflow.child_tickets.contains(&child.id) {
                workflow.child_tickets.push(child.id.clone());
            }
        }
        let mut grandchildren = HashMap::new();
        for gc in decomposition.grandchildren {
            self.store.put_grandchild_ticket(&gc).await?;
            grandchildren.insert(gc.id.clone(), gc);
        }
        self.store.put_workflow(workflow).await?;

        self.transition(workflow, Phase::Approval).await?;
        if let Some(bus) = bus {
            let _ = bus
                .send(AgentMessage::new(
                    &self.config.engine_agent_id,
                    "human",
                    MessagePayload::ApprovalRequest {
                        run_id: workflow.workflow_id.clone(),
                        workflow_id: workflow.workflow_id.clone(),
                        phase: "proposal".to_string(),
                    },
                ))
                .await;
        }

        let proposal = json!({
            "children": workflow.child_tickets.len(),
            "grandchildren": grandchildren.len(),
        });
        let resolution = self.approval_gate.request_approval(&workflow.workflow_id, Phase::Approval, proposal).await?;

        match resolution.action {
            ApprovalOutcome::Approve => Ok(ProposalOutcome::Approved(grandchildren)),
            ApprovalOutcome::RequestRevision => {
                self.transition(workflow, Phase::Proposal).await?;
                Ok(ProposalOutcome::Revise)
            }
            ApprovalOutcome::Reject => {
                self.transition(workflow, Phase::Failed).await?;
                Ok(ProposalOutcome::Failed)
            }
        }
    }

    /// Runs every grandchild through the Worker Pool, respecting
    /// `depends_on`, consulting `recommend_decision` on quality-gate
    /// failure and looping (retry/reassign) until either every grandchild
    /// completes or one escalates through the Approval Gate and is
    /// rejected. Returns `false` iff the workflow was failed.
    #[allow(clippy::too_many_arguments)]
    async fn run_execution(
        &self,
        workflow: &mut Workflow,
        project: &Project,
        grandchildren: &mut HashMap<String, GrandchildTicket>,
        executor_for_lane: &(dyn Fn(ChildLane) -> Arc<dyn TicketExecutor> + Send + Sync),
        quality_gate: &Arc<QualityGate>,
        quality_gate_config: &QualityGateConfig,
        bus: &Option<Arc<dyn MessageBus>>,
    ) -> WorkflowEngineResult<bool> {
        let work_dir = Path::new(&project.work_dir);

        loop {
            let runnable: Vec<String> = grandchildren
                .values()
                .filter(|g| {
                    !g.status.is_terminal()
                        && g.status != TicketStatus::RevisionRequired
                        && g.depends_on.iter().all(|dep| {
                            grandchildren.get(dep).map(|d| d.status == TicketStatus::Completed).unwrap_or(false)
                        })
                })
                .chain(grandchildren.values().filter(|g| g.status == TicketStatus::RevisionRequired))
                .map(|g| g.id.clone())
                .collect();

            if runnable.is_empty() {
                break;
            }

            for ticket_id in runnable {
                let ticket = grandchildren.get(&ticket_id).expect("just listed").clone();
                let executor = executor_for_lane(ticket.lane);
                let result = self
                    .worker_pool
                    .submit(
                        &workflow.workflow_id,
                        ticket.clone(),
                        &self.config.engine_agent_id,
                        work_dir,
                        &project.agent_branch,
                        executor,
                        Some((quality_gate.clone(), quality_gate_config.clone())),
                        bus.clone(),
                    )
                    .await?;

                let mut updated = ticket;
                updated.git_branch = Some(result.git_branch.clone());
                updated.artifacts = result.artifacts.clone();

                match result.status {
                    ExecutionStatus::Success => {
                        updated.status = TicketStatus::Completed;
                    }
                    ExecutionStatus::QualityFailed => {
                        updated.quality_failures += 1;
                        let outcome = result.quality_gates.as_ref().expect("quality_failed implies an outcome");
                        match recommend_decision(outcome, updated.quality_failures) {
                            GateDecision::Retry { instructions } => {
                                updated.status = TicketStatus::RevisionRequired;
                                updated.review_result = Some(instructions);
                            }
                            GateDecision::Reassign => {
                                updated.status = TicketStatus::Pending;
                                updated.assignee = None;
                            }
                            GateDecision::Escalate { role } => {
                                if let Some(bus) = bus {
                                    let _ = bus
                                        .send(AgentMessage::new(
                                            &self.config.engine_agent_id,
                                            &role,
                                            MessagePayload::Escalation {
                                                run_id: workflow.workflow_id.clone(),
                                                ticket_id: updated.id.clone(),
                                                reason: "repeated quality gate failures".to_string(),
                                            },
                                        ))
                                        .await;
                                }
                                self.transition(workflow, Phase::Approval).await?;
                                let resolution = self
                                    .approval_gate
                                    .request_approval(
                                        &workflow.workflow_id,
                                        Phase::Approval,
                                        json!({"ticket_id": updated.id, "role": role}),
                                    )
                                    .await?;
                                match resolution.action {
                                    ApprovalOutcome::Approve => {
                                        updated.status = TicketStatus::Pending;
                                        updated.quality_failures = 0;
                                    }
                                    ApprovalOutcome::RequestRevision => {
                                        updated.status = TicketStatus::RevisionRequired;
                                    }
                                    ApprovalOutcome::Reject => {
                                        updated.status = TicketStatus::Failed;
                                        self.transition(workflow, Phase::Execution).await?;
                                        self.store.put_grandchild_ticket(&updated).await?;
                                        grandchildren.insert(updated.id.clone(), updated);
                                        self.transition(workflow, Phase::Failed).await?;
                                        return Ok(false);
                                    }
                                }
                                self.transition(workflow, Phase::Execution).await?;
                            }
                        }
                    }
                    ExecutionStatus::Partial | ExecutionStatus::Error => {
                        warn!(ticket_id = %updated.id, errors = ?result.errors, "ticket produced no usable result");
                        updated.status = TicketStatus::Pending;
                    }
                }

                self.store.put_grandchild_ticket(&updated).await?;
                grandchildren.insert(updated.id.clone(), updated);
            }
        }

        let all_completed = grandchildren.values().all(|g| g.status == TicketStatus::Completed);
        if !all_completed {
            self.transition(workflow, Phase::Failed).await?;
            return Ok(false);
        }
        Ok(true)
    }

    fn run_delivery(
        &self,
        workflow: &Workflow,
        project: &Project,
        grandchildren: &HashMap<String, GrandchildTicket>,
    ) -> WorkflowEngineResult<()> {
        let git = GitCoordinator::new(&project.work_dir);
        for gc in grandchildren.values() {
            let Some(task_branch) = &gc.git_branch else { continue };
            let result = git.merge_to_agent_branch(&gc.id, task_branch, &project.agent_branch)?;
            info!(workflow_id = %workflow.workflow_id, ticket_id = %gc.id, success = result.success, auto_resolved = result.auto_resolved, "merged task branch");
            if !result.success {
                return Err(WorkflowEngineError::Git(GitCoordinatorError::Command {
                    operation: "merge_to_agent_branch".to_string(),
                    message: format!("unresolved conflicts merging ticket {}", gc.id),
                }));
            }
        }
        Ok(())
    }

    async fn run_retrospective(&self, workflow: &mut Workflow) -> WorkflowEngineResult<()> {
        let _minutes = self
            .meeting
            .convene_meeting(&workflow.workflow_id, &workflow.instruction, &self.config.facilitator_id)
            .await?;
        Ok(())
    }
}

enum ProposalOutcome {
    Approved(HashMap<String, GrandchildTicket>),
    Revise,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_follow_the_phase_diagram() {
        assert!(is_legal_transition(Phase::Meeting, Phase::Proposal));
        assert!(is_legal_transition(Phase::Approval, Phase::Execution));
        assert!(is_legal_transition(Phase::Approval, Phase::Proposal));
        assert!(is_legal_transition(Phase::Approval, Phase::Failed));
        assert!(is_legal_transition(Phase::Execution, Phase::Approval));
        assert!(is_legal_transition(Phase::Retrospective, Phase::Completed));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert!(!is_legal_transition(Phase::Meeting, Phase::Execution));
        assert!(!is_legal_transition(Phase::Completed, Phase::Meeting));
        assert!(!is_legal_transition(Phase::Failed, Phase::Proposal));
    }
}
