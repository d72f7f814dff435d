use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A convenience `Result` alias using [`ConvoyError`].
pub type ConvoyResult<T> = Result<T, ConvoyError>;

/// Top-level error type for Convoy.
///
/// Scheduling errors (`DanglingDependency`, `CyclicDependency`,
/// `DuplicateTask`) and planning errors are fatal to a mission. Pool errors
/// are fatal to one dispatch. `Provider` and `Timeout` are recoverable by
/// retry.
#[derive(Debug, thiserror::Error)]
pub enum ConvoyError {
    /// A task declares a dependency that is not part of the ingested batch.
    #[error("Task {task} depends on unknown task {missing}")]
    DanglingDependency {
        /// The task carrying the bad edge.
        task: Uuid,
        /// The dependency id that could not be resolved.
        missing: Uuid,
    },

    /// The dependency graph contains a cycle. The path starts and ends on the same task.
    #[error("Cyclic dependency: {}", display_path(.cycle))]
    CyclicDependency {
        /// Task ids along the cycle.
        cycle: Vec<Uuid>,
    },

    /// Two tasks in a batch (or a task and an already ingested one) share an id.
    #[error("Duplicate task id {0}")]
    DuplicateTask(Uuid),

    /// No agent is registered for the given role.
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// The model id is not in the catalog.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// The role is registered but does not accept this kind of task.
    #[error("Role {role} does not accept {task_type} tasks")]
    UnsupportedTaskType {
        /// Role name.
        role: String,
        /// Task type name.
        task_type: String,
    },

    /// The planning capability failed (network or provider fault).
    #[error("Planning error: {0}")]
    Planning(String),

    /// The planning capability returned a plan that cannot be turned into tasks.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// The agent invocation capability reported a failure.
    #[error("Provider error: {0}")]
    Provider(String),

    /// An agent invocation exceeded its per-call timeout.
    #[error("Timeout after {after_ms}ms")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        after_ms: u64,
    },

    /// No mission with this id is known to the engine.
    #[error("Unknown mission: {0}")]
    UnknownMission(Uuid),

    /// No task with this id exists in the mission.
    #[error("Unknown task: {0}")]
    UnknownTask(Uuid),

    /// A status change that the state machine does not allow.
    #[error("Invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        /// Entity id (task or mission).
        entity: Uuid,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// An event log that cannot be replayed into a store.
    #[error("Replay error: {0}")]
    Replay(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_path(cycle: &[Uuid]) -> String {
    cycle
        .iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl ConvoyError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvoyError::DanglingDependency { .. } => ErrorKind::DanglingDependency,
            ConvoyError::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            ConvoyError::DuplicateTask(_) => ErrorKind::DuplicateTask,
            ConvoyError::UnknownRole(_) => ErrorKind::UnknownRole,
            ConvoyError::UnknownModel(_) => ErrorKind::UnknownModel,
            ConvoyError::UnsupportedTaskType { .. } => ErrorKind::UnsupportedTaskType,
            ConvoyError::Planning(_) => ErrorKind::Planning,
            ConvoyError::InvalidPlan(_) => ErrorKind::InvalidPlan,
            ConvoyError::Provider(_) => ErrorKind::Provider,
            ConvoyError::Timeout { .. } => ErrorKind::Timeout,
            ConvoyError::UnknownMission(_)
            | ConvoyError::UnknownTask(_)
            | ConvoyError::InvalidTransition { .. }
            | ConvoyError::Replay(_)
            | ConvoyError::Config(_)
            | ConvoyError::Json(_)
            | ConvoyError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether a fresh dispatch of the same task may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Closed classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A task names a dependency that is not in the mission.
    DanglingDependency,
    /// The dependency graph contains a cycle.
    CyclicDependency,
    /// A task id was registered twice.
    DuplicateTask,
    /// No agent is registered for the role.
    UnknownRole,
    /// The model id is not in the catalog.
    UnknownModel,
    /// The agent does not accept the task type.
    UnsupportedTaskType,
    /// The planner failed to produce a plan.
    Planning,
    /// The plan was produced but could not be turned into tasks.
    InvalidPlan,
    /// The model provider returned an error.
    Provider,
    /// The invocation exceeded its deadline.
    Timeout,
    /// A dependency of the task failed, so the task was skipped.
    DependencyFailed,
    /// The mission was aborted before the task was dispatched.
    Aborted,
    /// A mission-critical task failed before the task was dispatched.
    MissionHalted,
    /// An engine fault unrelated to any single task.
    Internal,
}

impl ErrorKind {
    /// Provider faults and timeouts are transient; everything else is terminal.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Provider | ErrorKind::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::DanglingDependency => "dangling_dependency",
            ErrorKind::CyclicDependency => "cyclic_dependency",
            ErrorKind::DuplicateTask => "duplicate_task",
            ErrorKind::UnknownRole => "unknown_role",
            ErrorKind::UnknownModel => "unknown_model",
            ErrorKind::UnsupportedTaskType => "unsupported_task_type",
            ErrorKind::Planning => "planning",
            ErrorKind::InvalidPlan => "invalid_plan",
            ErrorKind::Provider => "provider",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DependencyFailed => "dependency_failed",
            ErrorKind::Aborted => "aborted",
            ErrorKind::MissionHalted => "mission_halted",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Structured error detail recorded on a task, a mission, or an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Classification of the failure.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl TaskError {
    /// Builds an error detail from a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Detail for a task skipped because `failed` did not complete.
    pub fn dependency_failed(failed: Uuid) -> Self {
        Self::new(
            ErrorKind::DependencyFailed,
            format!("dependency {failed} failed"),
        )
    }

    /// See [`ErrorKind::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl From<&ConvoyError> for TaskError {
    fn from(err: &ConvoyError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<ConvoyError> for TaskError {
    fn from(err: ConvoyError) -> Self {
        Self::from(&err)
    }
}
