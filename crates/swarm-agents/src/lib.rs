//! Workflow Engine, Worker Pool, Task Decomposer, and Control API for the
//! agent swarm orchestrator. Builds on `swarm_core`'s durable substrate
//! (State Store, Message Bus, Process Supervisor, Git Coordinator, Quality
//! Gate, Approval Gate, Meeting Coordinator, Project Registry).

#![allow(dead_code)]

pub mod acceptance;
pub mod agents;
pub mod beads_bridge;
pub mod coding_agent_executor;
pub mod config;
pub mod contracts;
pub mod control_api;
pub mod dashboard;
pub mod grammars;
pub mod implementer;
pub mod kb_refresh;
pub mod knowledge_sync;
pub mod modes;
pub mod notebook_bridge;
pub mod orchestrator;
pub mod prompts;
pub mod runtime_adapter;
pub mod state_machine;
pub mod task_decomposer;
pub mod telemetry;
pub mod tool_surface;
pub mod tools;
pub mod validator;
pub mod worker_pool;
pub mod workflow_engine;
pub mod worktree_bridge;

pub use coding_agent_executor::CodingAgentExecutor;
pub use task_decomposer::{Decomposition, DecomposerError, DecomposerResult, TaskDecomposer};
pub use tool_surface::{Edit, ToolCall, ToolCallError, ToolCallOutput, ToolCallResult, ToolSurface};
pub use worker_pool::{
    CommitInfo, ExecutionResult, ExecutionStatus, TicketExecutor, WorkerOutcome, WorkerPool,
    WorkerPoolConfig, WorkerPoolError,
};
pub use workflow_engine::{
    is_legal_transition, WorkflowEngine, WorkflowEngineConfig, WorkflowEngineError,
    WorkflowEngineResult,
};
