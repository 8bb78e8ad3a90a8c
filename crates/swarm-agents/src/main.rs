mod agents;
mod beads_bridge;
mod coding_agent_executor;
mod config;
mod control_api;
mod prompts;
mod task_decomposer;
mod tools;
mod worker_pool;
mod workflow_engine;
mod worktree_bridge;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rig::completion::Prompt;
use tracing::{error, info, warn};

use agents::reviewer::ReviewResult;
use agents::AgentFactory;
use coding_agent_executor::CodingAgentExecutor;
use config::{check_endpoint, SwarmConfig};
use swarm_core::feedback::ErrorCategory;
use swarm_core::{
    AddProjectOptions, ApprovalGate, CodingAgentAdapter, CodingAgentName, CodingAgentRegistry,
    ContextPacker, EscalationEngine, EscalationState, FileMessageBus, JsonFileStore,
    MeetingCoordinator, Phase, ProjectRegistry, ProcessSupervisor, QualityGate, QualityGateConfig,
    SwarmTier, Verifier, VerifierConfig, VerifierReport, Workflow, WorkflowStore, WorkPacket,
};
use worker_pool::WorkerPoolConfig;
use workflow_engine::{WorkflowEngine, WorkflowEngineConfig};

#[derive(Debug, Parser)]
#[command(name = "swarmctl", about = "Autonomous software-engineering agent orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Root directory for persisted workflow/project/approval state.
    #[arg(long, global = true, default_value = "state")]
    state_dir: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute a single ticket. Without `--decompose`, runs the local
    /// beads-driven implement/verify/review loop against `ticketId`. With
    /// `--decompose`, runs the full Workflow Engine pipeline instead.
    Execute {
        ticket_id: String,
        #[arg(long)]
        adapter: Option<String>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        decompose: bool,
    },
    /// Print the status of every known workflow.
    Status {
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        json: bool,
    },
    /// Fail a run in place.
    Stop { run_id: String },
    /// Re-run a failed workflow from the top of its pipeline.
    Resume { run_id: String },
    /// Manage target-repository project registrations.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Run the HTTP Control API.
    Server {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Print the quality-gate judgement for a run, optionally applying a waiver.
    Judge {
        run_id: String,
        #[arg(long)]
        waiver: Option<String>,
    },
    /// Record or inspect quality-gate waivers for a run.
    Waiver {
        #[command(subcommand)]
        action: WaiverAction,
    },
    /// Onboard a coding-agent adapter through capability-check stages.
    Hire {
        #[command(subcommand)]
        stage: HireStage,
    },
}

#[derive(Debug, Subcommand)]
enum ProjectAction {
    List,
    Add {
        name: String,
        git_url: String,
        #[arg(long, default_value = ".")]
        work_dir: String,
        #[arg(long, default_value = "main")]
        base_branch: String,
    },
    Show { name: String },
    Remove { name: String },
}

#[derive(Debug, Subcommand)]
enum WaiverAction {
    Create {
        run_id: String,
        ticket_id: String,
        reason: String,
    },
    List {
        run_id: String,
    },
    Validate {
        run_id: String,
        waiver_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum HireStage {
    /// Print the capability set ("job description") a candidate agent must satisfy.
    Jd { agent: String },
    /// Probe availability and version ("interview").
    Interview { agent: String },
    /// Run one prompt through the agent as a trial task.
    Trial { agent: String, prompt: String },
    /// Heuristically score the trial's output.
    Score { agent: String, prompt: String },
    /// Register the agent into the process-wide registry.
    Register { agent: String },
    /// Run jd → interview → trial → score → register in sequence.
    Full { agent: String },
}

fn parse_agent_name(raw: &str) -> Result<CodingAgentName> {
    match raw.to_lowercase().as_str() {
        "claude" | "claude-code" | "claudecode" => Ok(CodingAgentName::ClaudeCode),
        "opencode" | "open-code" => Ok(CodingAgentName::OpenCode),
        "kiro" | "kiro-cli" | "kirocli" => Ok(CodingAgentName::KiroCli),
        other => anyhow::bail!("unknown coding agent: {other} (expected claude, opencode, or kiro)"),
    }
}

struct Runtime {
    store: Arc<JsonFileStore>,
    approval_gate: Arc<ApprovalGate<JsonFileStore>>,
    project_registry: Arc<ProjectRegistry<JsonFileStore>>,
    coding_agents: Arc<CodingAgentRegistry>,
    supervisor: Arc<ProcessSupervisor>,
    bus: Arc<FileMessageBus>,
    state_dir: String,
}

impl Runtime {
    fn new(state_dir: &str) -> Self {
        let store = Arc::new(JsonFileStore::new(state_dir));
        let supervisor = Arc::new(ProcessSupervisor::new());
        Self {
            approval_gate: Arc::new(ApprovalGate::new(store.clone())),
            project_registry: Arc::new(ProjectRegistry::new(store.clone())),
            coding_agents: Arc::new(CodingAgentRegistry::with_default_agents(supervisor.clone())),
            bus: Arc::new(FileMessageBus::new(format!("{state_dir}/bus"))),
            supervisor,
            store,
            state_dir: state_dir.to_string(),
        }
    }

    fn meeting_coordinator(&self) -> MeetingCoordinator {
        MeetingCoordinator::new(self.state_dir.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let runtime = Runtime::new(&cli.state_dir);

    match cli.command {
        Commands::Execute { ticket_id, adapter, workers, decompose } => {
            if decompose {
                run_decomposed_ticket(&runtime, &ticket_id, adapter.as_deref(), workers).await
            } else {
                run_legacy_ticket(&ticket_id).await
            }
        }
        Commands::Status { verbose, json } => cmd_status(&runtime, verbose, json).await,
        Commands::Stop { run_id } => cmd_stop(&runtime, &run_id).await,
        Commands::Resume { run_id } => cmd_resume(&runtime, &run_id).await,
        Commands::Project { action } => cmd_project(&runtime, action).await,
        Commands::Server { port } => cmd_server(runtime, port).await,
        Commands::Judge { run_id, waiver } => cmd_judge(&runtime, &run_id, waiver.as_deref()).await,
        Commands::Waiver { action } => cmd_waiver(&runtime, action).await,
        Commands::Hire { stage } => cmd_hire(&runtime, stage).await,
    }
}

/// Runs a ticket through the full Workflow Engine pipeline: decomposition,
/// approval, worker-pool execution (via the Coding-Agent Registry), delivery,
/// and retrospective.
async fn run_decomposed_ticket(
    runtime: &Runtime,
    ticket_id: &str,
    adapter: Option<&str>,
    workers: Option<usize>,
) -> Result<()> {
    let explicit_agent = adapter.map(parse_agent_name).transpose()?;

    let repo_root = std::env::current_dir()?;
    let project = match runtime.project_registry.get_project_by_name("default").await? {
        Some(p) => p,
        None => {
            runtime
                .project_registry
                .add_project(
                    "default",
                    &format!("file://{}", repo_root.display()),
                    AddProjectOptions {
                        work_dir: repo_root.display().to_string(),
                        default_branch: "main".to_string(),
                        integration_branch: "swarm/integration".to_string(),
                        base_branch: "main".to_string(),
                        agent_branch: "swarm/agent".to_string(),
                        skip_git_url_validation: true,
                    },
                )
                .await?
        }
    };

    let instruction = format!("Resolve ticket {ticket_id}");
    let mut workflow = Workflow::new(ticket_id.to_string(), project.id.clone(), instruction);

    let pool_config = WorkerPoolConfig { max_workers: workers.unwrap_or(4), use_containers: false };
    let worker_pool = worker_pool::WorkerPool::new(pool_config);
    let engine = WorkflowEngine::new(
        runtime.store.clone(),
        runtime.approval_gate.clone(),
        runtime.meeting_coordinator(),
        worker_pool,
        WorkflowEngineConfig::default(),
    );

    let quality_gate = Arc::new(QualityGate::new(runtime.supervisor.clone()));
    let quality_gate_config = QualityGateConfig::default();

    let coding_agents = runtime.coding_agents.clone();
    let executor_for_lane = move |_lane: swarm_core::ChildLane| {
        let mut executor = CodingAgentExecutor::new(coding_agents.clone());
        if let Some(agent) = explicit_agent {
            executor = executor.with_agent(agent);
        }
        Arc::new(executor) as Arc<dyn worker_pool::TicketExecutor>
    };

    let llm_available = check_endpoint(&SwarmConfig::default().fast_endpoint.url).await;

    let result = engine
        .run(
            &mut workflow,
            &project,
            llm_available,
            &runtime.coding_agents,
            &executor_for_lane,
            quality_gate,
            quality_gate_config,
            Some(runtime.bus.clone() as Arc<dyn swarm_core::MessageBus>),
        )
        .await;

    match result {
        Ok(()) => info!(workflow_id = %workflow.workflow_id, phase = ?workflow.phase, "workflow finished"),
        Err(e) => error!(workflow_id = %workflow.workflow_id, "workflow failed: {e}"),
    }

    Ok(())
}

/// The original single-repository implement/verify/review loop: picks the
/// named (or highest-priority open) beads issue and drives it through the
/// escalation engine using local LLM endpoints.
async fn run_legacy_ticket(ticket_id: &str) -> Result<()> {
    let config = SwarmConfig::default();
    info!(
        fast = %config.fast_endpoint.url,
        coder = %config.coder_endpoint.url,
        reasoning = %config.reasoning_endpoint.url,
        cloud = config.cloud_endpoint.is_some(),
        max_retries = config.max_retries,
        "Swarm orchestrator starting"
    );

    let local_ok = check_endpoint(&config.fast_endpoint.url).await;
    let reasoning_ok = check_endpoint(&config.reasoning_endpoint.url).await;
    info!(local_ok, reasoning_ok, "Endpoint health check");

    if !local_ok && !reasoning_ok {
        if config.cloud_endpoint.is_some() {
            warn!("Local endpoints down — will attempt cloud-only mode");
        } else {
            error!("All endpoints unreachable and no cloud configured — exiting");
            anyhow::bail!("No inference endpoints available");
        }
    }

    let factory = AgentFactory::new(&config)?;
    let beads = beads_bridge::BeadsBridge::new();
    let repo_root = std::env::current_dir()?;
    let worktree_bridge =
        worktree_bridge::WorktreeBridge::new(config.worktree_base.clone(), &repo_root)?;

    let issues = match beads.list_open() {
        Ok(issues) => issues,
        Err(e) => {
            warn!("Beads not available: {e}");
            info!("No issues to process. Orchestrator exiting.");
            return Ok(());
        }
    };

    if issues.is_empty() {
        info!("No open issues. Orchestrator exiting.");
        return Ok(());
    }

    let issue = if ticket_id.is_empty() {
        let mut sorted = issues;
        sorted.sort_by_key(|i| i.priority.unwrap_or(4));
        sorted.into_iter().next().context("no issues after sort")?
    } else {
        issues
            .into_iter()
            .find(|i| i.id == ticket_id)
            .with_context(|| format!("ticket {ticket_id} not found among open beads issues"))?
    };

    info!(id = %issue.id, title = %issue.title, priority = ?issue.priority, "Picked issue to work on");

    beads.update_status(&issue.id, "in_progress")?;
    info!(id = %issue.id, "Claimed issue");

    let wt_path = match worktree_bridge.create(&issue.id) {
        Ok(p) => {
            info!(path = %p.display(), "Created worktree");
            p
        }
        Err(e) => {
            error!(id = %issue.id, "Failed to create worktree: {e}");
            return Err(e);
        }
    };

    let rust_coder = factory.build_rust_coder(&wt_path);
    let general_coder = factory.build_general_coder(&wt_path);
    let reviewer = factory.build_reviewer();
    let manager = factory.build_manager(&wt_path);
    let cloud_agent = factory.build_cloud_agent();

    let engine = EscalationEngine::new();
    let mut escalation = EscalationState::new(&issue.id);
    let mut success = false;
    let mut last_report: Option<VerifierReport> = None;
    let mut cloud_guidance: Option<String> = None;

    for iteration in 1..=config.max_retries {
        let tier = escalation.current_tier;
        info!(iteration, ?tier, id = %issue.id, "Starting iteration");

        let packer = ContextPacker::new(&wt_path, tier);
        let packet = if let Some(ref report) = last_report {
            packer.pack_retry(&issue.id, &issue.title, &escalation, report)
        } else {
            packer.pack_initial(&issue.id, &issue.title)
        };

        info!(tokens = packet.estimated_tokens(), files = packet.file_contexts.len(), "Packed context");

        let task_prompt = format_task_prompt(&packet, cloud_guidance.as_deref());

        let agent_response: Result<String, _> = match tier {
            SwarmTier::Implementer | SwarmTier::Adversary => {
                let recent_cats: Vec<ErrorCategory> =
                    escalation.recent_error_categories.last().cloned().unwrap_or_default();

                if should_use_rust_coder(&recent_cats) {
                    info!(iteration, "Routing to rust_coder (strand-14B)");
                    rust_coder.prompt(&task_prompt).await
                } else {
                    info!(iteration, "Routing to general_coder (Qwen3-Coder-Next)");
                    general_coder.prompt(&task_prompt).await
                }
            }
            SwarmTier::Integrator => {
                info!(iteration, "Routing to manager (OR1-Behemoth)");
                manager.prompt(&task_prompt).await
            }
            SwarmTier::Cloud => {
                if let Some(ref cloud) = cloud_agent {
                    info!(iteration, "Routing to cloud escalation");
                    match cloud.prompt(&task_prompt).await {
                        Ok(guidance) => {
                            info!(iteration, guidance_len = guidance.len(), "Cloud guidance received");
                            cloud_guidance = Some(guidance);
                            escalation.record_iteration(vec![], 0, false);
                            continue;
                        }
                        Err(e) => {
                            error!(iteration, "Cloud agent failed: {e}");
                            escalation.record_iteration(vec![], 0, false);
                            continue;
                        }
                    }
                } else {
                    error!("Cloud tier requested but no cloud agent configured");
                    error!("Flagging issue for human intervention");
                    break;
                }
            }
        };

        cloud_guidance = None;

        let _response = match agent_response {
            Ok(r) => {
                info!(iteration, response_len = r.len(), "Agent responded");
                r
            }
            Err(e) => {
                error!(iteration, "Agent failed: {e}");
                escalation.record_iteration(vec![], 1, false);

                let verifier = Verifier::new(&wt_path, VerifierConfig::default());
                let report = verifier.run_pipeline().await;
                let decision = engine.decide(&mut escalation, &report);
                last_report = Some(report);

                if decision.stuck {
                    error!(iteration, "Escalation engine: stuck after agent failure");
                    break;
                }
                continue;
            }
        };

        let has_changes = match git_commit_changes(&wt_path, iteration) {
            Ok(changed) => changed,
            Err(e) => {
                warn!(iteration, "git commit error: {e}");
                false
            }
        };

        if !has_changes {
            warn!(iteration, "No file changes after agent response");
            escalation.record_iteration(vec![], 0, false);

            let verifier = Verifier::new(&wt_path, VerifierConfig::default());
            let report = verifier.run_pipeline().await;
            let decision = engine.decide(&mut escalation, &report);
            last_report = Some(report);

            if decision.stuck {
                error!(iteration, "Escalation engine: stuck (no changes)");
                break;
            }
            continue;
        }

        let verifier = Verifier::new(&wt_path, VerifierConfig::default());
        let report = verifier.run_pipeline().await;

        info!(iteration, all_green = report.all_green, summary = %report.summary(), "Verifier report");

        let error_cats = report.unique_error_categories();
        let error_count = report.failure_signals.len();

        if report.all_green {
            let diff = git_diff(&wt_path)?;
            if diff.is_empty() {
                warn!(iteration, "Empty diff despite git changes — verifier may be wrong");
                escalation.record_iteration(error_cats, error_count, false);
                let decision = engine.decide(&mut escalation, &report);
                last_report = Some(report);
                if decision.stuck {
                    break;
                }
                continue;
            }

            info!(iteration, diff_len = diff.len(), "Sending diff to blind reviewer");
            match reviewer.prompt(&diff).await {
                Ok(resp) => {
                    let result = ReviewResult::parse(&resp);
                    if result.passed {
                        info!(iteration, "Reviewer PASSED — issue resolved");
                        escalation.record_iteration(error_cats, error_count, true);
                        success = true;
                        break;
                    } else {
                        warn!(iteration, feedback = %result.feedback, "Reviewer FAILED — looping");
                        escalation.record_iteration(error_cats, error_count, false);
                    }
                }
                Err(e) => {
                    warn!(iteration, "Reviewer unavailable: {e}");
                    info!(iteration, "Verifier passed, reviewer unreachable — accepting result");
                    escalation.record_iteration(error_cats, error_count, true);
                    success = true;
                    break;
                }
            }
        } else {
            escalation.record_iteration(error_cats, error_count, false);
        }

        let decision = engine.decide(&mut escalation, &report);
        last_report = Some(report);

        if decision.escalated {
            info!(iteration, from = ?tier, to = ?decision.target_tier, reason = %decision.reason, "Tier escalated");
        }

        if decision.stuck {
            error!(iteration, reason = %decision.reason, "Escalation engine: stuck — flagging for human intervention");
            break;
        }
    }

    if success {
        info!(id = %issue.id, "Issue resolved — merging worktree");
        if let Err(e) = worktree_bridge.merge_and_remove(&issue.id) {
            error!(id = %issue.id, "Merge failed: {e} — resetting issue to open");
            let _ = beads.update_status(&issue.id, "open");
            return Err(e);
        }
        beads.close(&issue.id, Some("Resolved by swarm orchestrator"))?;
        info!(id = %issue.id, "Issue closed");
    } else {
        error!(
            id = %issue.id,
            iterations = config.max_retries,
            summary = %escalation.summary(),
            "Issue NOT resolved after max retries — leaving worktree for inspection"
        );
    }

    Ok(())
}

async fn cmd_status(runtime: &Runtime, verbose: bool, json: bool) -> Result<()> {
    let workflows = runtime.store.list_workflows().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!("No workflows recorded under {}", runtime.state_dir);
        return Ok(());
    }

    for workflow in &workflows {
        println!("{}  {:?}  {}", workflow.workflow_id, workflow.phase, workflow.instruction);
        if verbose {
            println!("    project: {}", workflow.project_id);
            println!("    tickets: {}", workflow.child_tickets.join(", "));
            println!("    updated: {}", workflow.updated_at);
        }
    }
    Ok(())
}

async fn cmd_stop(runtime: &Runtime, run_id: &str) -> Result<()> {
    let Some(mut workflow) = runtime.store.get_workflow(run_id).await? else {
        anyhow::bail!("run {run_id} not found");
    };
    workflow.phase = Phase::Failed;
    workflow.touch();
    runtime.store.put_workflow(&workflow).await?;
    println!("stopped {run_id}");
    Ok(())
}

async fn cmd_resume(runtime: &Runtime, run_id: &str) -> Result<()> {
    let Some(mut workflow) = runtime.store.get_workflow(run_id).await? else {
        anyhow::bail!("run {run_id} not found");
    };
    if workflow.phase != Phase::Failed {
        anyhow::bail!("run {run_id} is not in a failed state (currently {:?})", workflow.phase);
    }
    workflow.phase = Phase::Proposal;
    workflow.touch();
    runtime.store.put_workflow(&workflow).await?;
    println!("resumed {run_id} — re-entering proposal phase; invoke `execute {run_id} --decompose` to continue");
    Ok(())
}

async fn cmd_project(runtime: &Runtime, action: ProjectAction) -> Result<()> {
    match action {
        ProjectAction::List => {
            let projects = runtime.project_registry.list_projects().await?;
            for p in projects {
                println!("{}  {}  {}", p.name, p.id, p.git_url);
            }
        }
        ProjectAction::Add { name, git_url, work_dir, base_branch } => {
            let project = runtime
                .project_registry
                .add_project(
                    &name,
                    &git_url,
                    AddProjectOptions {
                        work_dir,
                        default_branch: base_branch.clone(),
                        integration_branch: "swarm/integration".to_string(),
                        base_branch,
                        agent_branch: "swarm/agent".to_string(),
                        skip_git_url_validation: false,
                    },
                )
                .await?;
            println!("registered project {} ({})", project.name, project.id);
        }
        ProjectAction::Show { name } => {
            let Some(project) = runtime.project_registry.get_project_by_name(&name).await? else {
                anyhow::bail!("project {name} not found");
            };
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        ProjectAction::Remove { name } => {
            let Some(project) = runtime.project_registry.get_project_by_name(&name).await? else {
                anyhow::bail!("project {name} not found");
            };
            let root = runtime.store.root();
            let _ = tokio::fs::remove_file(root.join(format!("projects/{}.json", project.id))).await;
            let _ = tokio::fs::remove_file(root.join(format!("projects-by-name/{}.json", project.name))).await;
            runtime.project_registry.clear_cache().await;
            println!("removed project {name}");
        }
    }
    Ok(())
}

async fn cmd_server(runtime: Runtime, port: u16) -> Result<()> {
    let llm_available = Arc::new(AtomicBool::new(
        check_endpoint(&SwarmConfig::default().fast_endpoint.url).await,
    ));

    let state = control_api::AppState {
        store: runtime.store.clone(),
        approval_gate: runtime.approval_gate.clone(),
        project_registry: runtime.project_registry.clone(),
        coding_agents: runtime.coding_agents.clone(),
        bus: runtime.bus.clone(),
        llm_available,
    };

    let app = control_api::router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Control API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn cmd_judge(runtime: &Runtime, run_id: &str, waiver: Option<&str>) -> Result<()> {
    let Some(workflow) = runtime.store.get_workflow(run_id).await? else {
        anyhow::bail!("run {run_id} not found");
    };

    let mut tickets = Vec::new();
    for child_id in &workflow.child_tickets {
        tickets.extend(runtime.store.list_grandchild_tickets(child_id).await?);
    }

    let waived = match waiver {
        Some(waiver_id) => {
            let history = runtime.store.get_approval_history(run_id).await?;
            let prefix = format!("waiver:{waiver_id}:");
            history.iter().any(|d| d.feedback.as_deref().map(|f| f.starts_with(&prefix)).unwrap_or(false))
        }
        None => false,
    };

    for ticket in &tickets {
        // Mirrors swarm_core::recommend_decision's failure-streak bucketing
        // without requiring a fresh QualityGateOutcome for a past run.
        let verdict = match ticket.quality_failures {
            0 | 1 => "retry",
            2 => "reassign",
            _ => "escalate:quality_authority",
        };
        println!(
            "{}  failures={}  {verdict}{}",
            ticket.id,
            ticket.quality_failures,
            if waived { " (waived)" } else { "" }
        );
    }

    if tickets.is_empty() {
        println!("no tickets recorded for run {run_id}");
    }
    Ok(())
}

async fn cmd_waiver(runtime: &Runtime, action: WaiverAction) -> Result<()> {
    match action {
        WaiverAction::Create { run_id, ticket_id, reason } => {
            let waiver_id = uuid::Uuid::new_v4().to_string();
            let decision = swarm_core::ApprovalDecision {
                workflow_id: run_id.clone(),
                phase: Phase::Review,
                action: swarm_core::ApprovalOutcome::Approve,
                feedback: Some(format!("waiver:{waiver_id}:{ticket_id}:{reason}")),
                decided_at: chrono::Utc::now(),
            };
            runtime.store.append_approval(&decision).await?;
            println!("created waiver {waiver_id} for ticket {ticket_id} on run {run_id}");
        }
        WaiverAction::List { run_id } => {
            let history = runtime.store.get_approval_history(&run_id).await?;
            for decision in history.iter().filter(|d| {
                d.feedback.as_deref().map(|f| f.starts_with("waiver:")).unwrap_or(false)
            }) {
                println!("{}", decision.feedback.as_deref().unwrap_or_default());
            }
        }
        WaiverAction::Validate { run_id, waiver_id } => {
            let history = runtime.store.get_approval_history(&run_id).await?;
            let found = history.iter().any(|d| {
                d.feedback.as_deref().map(|f| f.starts_with(&format!("waiver:{waiver_id}:"))).unwrap_or(false)
            });
            if found {
                println!("waiver {waiver_id} is valid for run {run_id}");
            } else {
                anyhow::bail!("no such waiver {waiver_id} for run {run_id}");
            }
        }
    }
    Ok(())
}

fn print_jd(name: CodingAgentName) {
    println!(
        "{} capability set: execute, isAvailable, getVersion, name, displayName (binary: {})",
        name.display_name(),
        name.binary()
    );
}

async fn print_interview(runtime: &Runtime, name: CodingAgentName) {
    let candidate = swarm_core::CliCodingAgentAdapter::new(name, runtime.supervisor.clone());
    match candidate.get_version().await {
        Some(v) => println!("{} available, version {v}", name.display_name()),
        None => println!("{} not available on PATH", name.display_name()),
    }
}

fn print_register(name: CodingAgentName) {
    println!("{} is already registered via default priority fallback", name.display_name());
}

async fn cmd_hire(runtime: &Runtime, stage: HireStage) -> Result<()> {
    match stage {
        HireStage::Jd { agent } => print_jd(parse_agent_name(&agent)?),
        HireStage::Interview { agent } => print_interview(runtime, parse_agent_name(&agent)?).await,
        HireStage::Trial { agent, prompt } => {
            let response = run_trial(runtime, &agent, &prompt).await?;
            println!("{}", response.stdout);
        }
        HireStage::Score { agent, prompt } => {
            let response = run_trial(runtime, &agent, &prompt).await?;
            let score = if response.succeeded() { (response.stdout.len() / 20).min(100) } else { 0 };
            println!("score: {score}/100 (exit {:?})", response.exit_code);
        }
        HireStage::Register { agent } => print_register(parse_agent_name(&agent)?),
        HireStage::Full { agent } => {
            let name = parse_agent_name(&agent)?;
            print_jd(name);
            print_interview(runtime, name).await;
            let response = run_trial(runtime, &agent, "print ok").await?;
            let score = if response.succeeded() { (response.stdout.len() / 20).min(100) } else { 0 };
            println!("score: {score}/100 (exit {:?})", response.exit_code);
            print_register(name);
        }
    }
    Ok(())
}

async fn run_trial(
    runtime: &Runtime,
    agent: &str,
    prompt: &str,
) -> Result<swarm_core::CodingAgentResponse> {
    let name = parse_agent_name(agent)?;
    let candidate = swarm_core::CliCodingAgentAdapter::new(name, runtime.supervisor.clone());
    let request = swarm_core::CodingAgentRequest {
        working_directory: std::env::current_dir()?,
        prompt: prompt.to_string(),
        timeout_seconds: Some(60),
        env: Vec::new(),
    };
    Ok(candidate.execute(request).await?)
}

/// Format a WorkPacket into a structured prompt for agent consumption.
fn format_task_prompt(packet: &WorkPacket, cloud_guidance: Option<&str>) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# Task: {}\n\n", packet.objective));
    prompt.push_str(&format!(
        "**Branch:** {} | **Iteration:** {} | **Tier:** {}\n\n",
        packet.branch, packet.iteration, packet.target_tier
    ));

    if let Some(guidance) = cloud_guidance {
        prompt.push_str("## Architectural Guidance (from cloud escalation)\n");
        prompt.push_str(guidance);
        prompt.push_str("\n\n");
    }

    if !packet.constraints.is_empty() {
        prompt.push_str("## Constraints\n");
        for c in &packet.constraints {
            prompt.push_str(&format!("- [{:?}] {}\n", c.kind, c.description));
        }
        prompt.push('\n');
    }

    if !packet.failure_signals.is_empty() {
        prompt.push_str("## Current Errors to Fix\n");
        for signal in &packet.failure_signals {
            prompt.push_str(&format!(
                "- **{}** ({}): {}\n",
                signal.category,
                signal.code.as_deref().unwrap_or("?"),
                signal.message
            ));
            if let Some(file) = &signal.file {
                prompt.push_str(&format!("  File: {}:{}\n", file, signal.line.unwrap_or(0)));
            }
        }
        prompt.push('\n');
    }

    if !packet.previous_attempts.is_empty() {
        prompt.push_str("## Previous Attempts (avoid repeating these)\n");
        for attempt in &packet.previous_attempts {
            prompt.push_str(&format!("- {attempt}\n"));
        }
        prompt.push('\n');
    }

    if !packet.file_contexts.is_empty() {
        prompt.push_str("## Relevant Files\n");
        for ctx in &packet.file_contexts {
            prompt.push_str(&format!(
                "- `{}` (lines {}-{}) — {}\n",
                ctx.file, ctx.start_line, ctx.end_line, ctx.relevance
            ));
        }
        prompt.push('\n');
        prompt
            .push_str("_Use the `read_file` tool to read these files before making changes._\n\n");
    }

    if !packet.key_symbols.is_empty() {
        prompt.push_str("## Key Symbols\n");
        for sym in &packet.key_symbols {
            prompt.push_str(&format!("- `{}` ({}) in {}", sym.name, sym.kind, sym.file));
            if let Some(line) = sym.line {
                prompt.push_str(&format!(":{line}"));
            }
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "**Max patch size:** {} LOC\n",
        packet.max_patch_loc
    ));

    prompt
}

/// Stage and commit all changes in the worktree.
///
/// Returns `true` if there were changes to commit, `false` if clean.
fn git_commit_changes(wt_path: &Path, iteration: u32) -> Result<bool> {
    let add = std::process::Command::new("git")
        .args(["add", "-A"])
        .current_dir(wt_path)
        .output()?;
    if !add.status.success() {
        let stderr = String::from_utf8_lossy(&add.stderr);
        anyhow::bail!("git add failed: {stderr}");
    }

    let status = std::process::Command::new("git")
        .args(["diff", "--cached", "--quiet"])
        .current_dir(wt_path)
        .output()?;

    if status.status.success() {
        return Ok(false);
    }

    let msg = format!("swarm: iteration {iteration} changes");
    let commit = std::process::Command::new("git")
        .args(["commit", "-m", &msg])
        .current_dir(wt_path)
        .output()?;
    if !commit.status.success() {
        let stderr = String::from_utf8_lossy(&commit.stderr);
        anyhow::bail!("git commit failed: {stderr}");
    }

    Ok(true)
}

/// Get the git diff of the worktree vs its parent branch.
fn git_diff(worktree_path: &Path) -> Result<String> {
    let output = std::process::Command::new("git")
        .args(["diff", "HEAD~1..HEAD"])
        .current_dir(worktree_path)
        .output()?;

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Determine if the Rust specialist coder should handle this task
/// based on error categories from the last verifier run.
///
/// Rust-specific errors (borrow checker, lifetimes, trait bounds) go to
/// strand-14B. Everything else goes to the general coder.
fn should_use_rust_coder(error_cats: &[ErrorCategory]) -> bool {
    if error_cats.is_empty() {
        return false;
    }
    error_cats.iter().any(|cat| {
        matches!(
            cat,
            ErrorCategory::BorrowChecker
                | ErrorCategory::Lifetime
                | ErrorCategory::TraitBound
                | ErrorCategory::TypeMismatch
                | ErrorCategory::Async
        )
    })
}
