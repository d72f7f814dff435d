//! Multi-agent mission engine.
//!
//! A mission turns one user request into a dependency graph of tasks, each
//! assigned to a specialized agent role, and dispatches ready tasks to the
//! agent pool in parallel batches while recording every change as an event.
//!
//! # Main types
//!
//! - [`Orchestrator`]: starts, aborts and observes missions.
//! - [`AgentPool`]: role registry bound to models, plus the invocation capability.
//! - [`TaskScheduler`]: dependency validation, readiness and failure cascade.
//! - [`MissionStore`]: event-sourced mission state with replay.
//! - [`Planner`] and [`AgentInvoker`]: the two external capabilities.

/// TOML configuration.
pub mod config;
/// Mission driver and dispatch loop.
pub mod engine;
/// Mission event log entries.
pub mod event;
/// Agent invocation capability.
pub mod invoker;
/// Planning capability and plan conversion.
pub mod planner;
/// Role registry and model bindings.
pub mod pool;
/// Default role profiles.
pub mod profiles;
/// Dependency-aware task table.
pub mod scheduler;
/// Event sinks.
pub mod sink;
/// Event-sourced mission state.
pub mod store;
/// Shared mission types (Task, Mission, Artifact, AgentState, etc.).
pub mod types;

pub use config::ConvoyConfig;
pub use engine::{ExecutionMode, MissionOptions, Orchestrator};
pub use event::{EventKind, MissionEvent};
pub use invoker::{AgentInvoker, InvocationOutput, InvocationRequest};
pub use planner::{
    default_analysis, default_plan, parse_plan_response, plan_to_tasks, InvokerPlanner,
    MissionPlan, Planner, StaticPlanner, TaskPlanItem,
};
pub use pool::{AgentConfig, AgentPool};
pub use profiles::default_profiles;
pub use scheduler::{TaskCounts, TaskScheduler};
pub use sink::{read_jsonl, EventSink, JsonLinesSink, MemorySink};
pub use store::{MissionSnapshot, MissionStore};
pub use types::{
    AgentRole, AgentState, AgentStatus, Artifact, ArtifactKind, Complexity, Mission,
    MissionAnalysis, MissionStatus, Task, TaskPriority, TaskStatus, TaskType,
};
