//! Control API — HTTP surface over the Workflow Engine, exposed by
//! `swarmctl server`. Routes follow SPEC_FULL.md's External Interfaces
//! table; handlers are thin adapters over the same coordination types the
//! CLI subcommands call directly.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use swarm_core::{
    ApprovalGate, CodingAgentRegistry, JsonFileStore, MessageBus, Phase, Project, ProjectRegistry,
    Workflow, WorkflowStore,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::task_decomposer::TaskDecomposer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JsonFileStore>,
    pub approval_gate: Arc<ApprovalGate<JsonFileStore>>,
    pub project_registry: Arc<ProjectRegistry<JsonFileStore>>,
    pub coding_agents: Arc<CodingAgentRegistry>,
    pub bus: Arc<dyn MessageBus>,
    pub llm_available: Arc<std::sync::atomic::AtomicBool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/health/ai", get(health_ai))
        .route("/api/tasks", post(create_task))
        .route("/api/tasks/{id}", get(get_task).delete(stop_task))
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/agents/pause", post(pause_agents))
        .route("/api/agents/resume", post(resume_agents))
        .route("/api/agents/emergency-stop", post(emergency_stop_agents))
        .route("/api/dashboard/status", get(dashboard_status))
        .route("/api/runs/{run_id}/report", get(run_report))
        .route("/api/runs/{run_id}/artifacts", get(run_artifacts))
        .route("/api/runs/{run_id}/quality", get(run_quality))
        .route("/api/config", get(get_config))
        .route("/api/config/validate", post(validate_config))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// spec.md's AI-availability gate: admit when an LLM adapter OR any
/// registered coding agent is up; otherwise respond 503 with setup hints.
async fn health_ai(State(state): State<AppState>) -> impl IntoResponse {
    let llm_available = state.llm_available.load(std::sync::atomic::Ordering::Relaxed);
    let coding_agents_available = state.coding_agents.any_available().await;

    if !llm_available && !coding_agents_available {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ollamaRunning": false,
                "llmAvailable": false,
                "codingAgentsAvailable": false,
                "setupInstructions": "Start a local LLM endpoint or install one of: claude, opencode, kiro",
            })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "ollamaRunning": llm_available,
            "llmAvailable": llm_available,
            "codingAgentsAvailable": coding_agents_available,
            "registeredAgents": state.coding_agents.registered_names(),
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub project_id: String,
    pub instruction: String,
}

async fn create_task(state: State<AppState>, body: Json<CreateTaskRequest>) -> impl IntoResponse {
    create_workflow(state, body).await
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskRequest>,
) -> impl IntoResponse {
    let llm_available = state.llm_available.load(std::sync::atomic::Ordering::Relaxed);
    if !llm_available && !state.coding_agents.any_available().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "no AI backend available",
                "ollamaRunning": false,
            })),
        )
            .into_response();
    }

    let workflow_id = uuid::Uuid::new_v4().to_string();
    let mut workflow = Workflow::new(workflow_id.clone(), body.project_id.clone(), body.instruction.clone());

    let decomposer = TaskDecomposer::new();
    match decomposer.decompose(&workflow.workflow_id, &workflow.instruction, &[], &[]) {
        Ok(decomposition) => {
            for child in &decomposition.children {
                workflow.child_tickets.push(child.id.clone());
                if let Err(e) = state.store.put_child_ticket(child).await {
                    warn!("failed to persist child ticket: {e}");
                }
            }
            for gc in &decomposition.grandchildren {
                if let Err(e) = state.store.put_grandchild_ticket(gc).await {
                    warn!("failed to persist grandchild ticket: {e}");
                }
            }
        }
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response();
        }
    }

    workflow.phase = Phase::Proposal;
    match state.store.put_workflow(&workflow).await {
        Ok(()) => {
            info!(workflow_id = %workflow.workflow_id, "workflow created");
            (StatusCode::CREATED, Json(json!(workflow))).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    pub status: Option<String>,
}

async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> impl IntoResponse {
    match state.store.list_workflows().await {
        Ok(workflows) => {
            let filtered: Vec<Workflow> = match &query.status {
                Some(status) => workflows
                    .into_iter()
                    .filter(|w| format!("{:?}", w.phase).to_lowercase() == status.to_lowercase())
                    .collect(),
                None => workflows,
            };
            (StatusCode::OK, Json(json!(filtered))).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn get_workflow(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> impl IntoResponse {
    match state.store.get_workflow(&id).await {
        Ok(Some(workflow)) => (StatusCode::OK, Json(json!(workflow))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "workflow not found"}))).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn get_task(state: State<AppState>, id: AxumPath<String>) -> impl IntoResponse {
    get_workflow(state, id).await
}

async fn stop_task(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> impl IntoResponse {
    match state.store.get_workflow(&id).await {
        Ok(Some(mut workflow)) => {
            workflow.phase = Phase::Failed;
            workflow.touch();
            match state.store.put_workflow(&workflow).await {
                Ok(()) => (StatusCode::OK, Json(json!({"stopped": id}))).into_response(),
                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
            }
        }
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "run not found"}))).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn broadcast_agent_control(state: &AppState, body: &str) -> impl IntoResponse {
    let message = swarm_core::AgentMessage::new(
        "control-api",
        "*",
        swarm_core::MessagePayload::Broadcast { run_id: String::new(), body: body.to_string() },
    );
    match state.bus.send(message).await {
        Ok(()) => (StatusCode::OK, Json(json!({"broadcast": body}))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))),
    }
}

async fn pause_agents(State(state): State<AppState>) -> impl IntoResponse {
    broadcast_agent_control(&state, "pause").await
}

async fn resume_agents(State(state): State<AppState>) -> impl IntoResponse {
    broadcast_agent_control(&state, "resume").await
}

async fn emergency_stop_agents(State(state): State<AppState>) -> impl IntoResponse {
    broadcast_agent_control(&state, "emergency-stop").await
}

async fn dashboard_status(State(state): State<AppState>) -> impl IntoResponse {
    let workflows = state.store.list_workflows().await.unwrap_or_default();
    let mut by_phase: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for w in &workflows {
        *by_phase.entry(format!("{:?}", w.phase)).or_insert(0) += 1;
    }
    let pending_approvals = state.approval_gate.get_pending_approvals().await;

    Json(json!({
        "totalWorkflows": workflows.len(),
        "byPhase": by_phase,
        "pendingApprovals": pending_approvals.len(),
        "codingAgents": state.coding_agents.registered_names(),
    }))
}

async fn run_report(State(state): State<AppState>, AxumPath(run_id): AxumPath<String>) -> impl IntoResponse {
    let tickets = match collect_tickets(&state, &run_id).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let completed = tickets.iter().filter(|t| matches!(t.status, swarm_core::TicketStatus::Completed)).count();
    Json(json!({
        "runId": run_id,
        "ticketCount": tickets.len(),
        "completed": completed,
        "tickets": tickets,
    }))
    .into_response()
}

async fn run_artifacts(State(state): State<AppState>, AxumPath(run_id): AxumPath<String>) -> impl IntoResponse {
    let tickets = match collect_tickets(&state, &run_id).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let artifacts: Vec<_> = tickets.into_iter().flat_map(|t| t.artifacts).collect();
    Json(json!({"runId": run_id, "artifacts": artifacts})).into_response()
}

async fn run_quality(State(state): State<AppState>, AxumPath(run_id): AxumPath<String>) -> impl IntoResponse {
    let tickets = match collect_tickets(&state, &run_id).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let failures: usize = tickets.iter().map(|t| t.quality_failures as usize).sum();
    Json(json!({"runId": run_id, "totalQualityFailures": failures})).into_response()
}

async fn collect_tickets(
    state: &AppState,
    run_id: &str,
) -> Result<Vec<swarm_core::GrandchildTicket>, axum::response::Response> {
    let workflow = state.store.get_workflow(run_id).await.map_err(|e| {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
    })?;
    let Some(workflow) = workflow else {
        return Err((StatusCode::NOT_FOUND, Json(json!({"error": "run not found"}))).into_response());
    };

    let mut tickets = Vec::new();
    for child_id in &workflow.child_tickets {
        match state.store.list_grandchild_tickets(child_id).await {
            Ok(gcs) => tickets.extend(gcs),
            Err(e) => warn!("failed to list grandchildren for {child_id}: {e}"),
        }
    }
    Ok(tickets)
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    let projects = state.project_registry.list_projects().await.unwrap_or_default();
    let summaries: Vec<Value> = projects
        .iter()
        .map(|p: &Project| json!({"id": p.id, "name": p.name, "gitUrl": p.git_url}))
        .collect();
    Json(json!({"projects": summaries}))
}

async fn validate_config(Json(body): Json<Value>) -> impl IntoResponse {
    let valid = body.is_object();
    (StatusCode::OK, Json(json!({"valid": valid})))
}
