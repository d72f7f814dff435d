use chrono::{DateTime, Utc};
use convoy_agent::TokenUsage;
use convoy_core::{ConvoyError, TaskError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Role of each agent in the multi-agent system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Analyzes the request and routes work.
    Orchestrator,
    /// Designs architecture, data flow and interfaces.
    Planner,
    /// Writes the code.
    Implementer,
    /// Writes tests and validates behaviour.
    Tester,
    /// Reviews quality, security and performance.
    Reviewer,
}

impl AgentRole {
    /// Every role, in registry order.
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Orchestrator,
        AgentRole::Planner,
        AgentRole::Implementer,
        AgentRole::Tester,
        AgentRole::Reviewer,
    ];
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Orchestrator => write!(f, "orchestrator"),
            AgentRole::Planner => write!(f, "planner"),
            AgentRole::Implementer => write!(f, "implementer"),
            AgentRole::Tester => write!(f, "tester"),
            AgentRole::Reviewer => write!(f, "reviewer"),
        }
    }
}

impl std::str::FromStr for AgentRole {
    type Err = ConvoyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "orchestrator" => Ok(AgentRole::Orchestrator),
            "planner" => Ok(AgentRole::Planner),
            "implementer" => Ok(AgentRole::Implementer),
            "tester" => Ok(AgentRole::Tester),
            "reviewer" => Ok(AgentRole::Reviewer),
            _ => Err(ConvoyError::UnknownRole(s.to_string())),
        }
    }
}

/// Kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Understand the request and its constraints.
    Analyze,
    /// Design the solution.
    Plan,
    /// Write code.
    Implement,
    /// Write or run tests.
    Test,
    /// Review earlier output.
    Review,
}

impl TaskType {
    /// Artifact kind produced when the invoker does not specify one.
    pub fn default_artifact_kind(self) -> ArtifactKind {
        match self {
            TaskType::Analyze => ArtifactKind::Document,
            TaskType::Plan => ArtifactKind::Blueprint,
            TaskType::Implement => ArtifactKind::Code,
            TaskType::Test => ArtifactKind::Test,
            TaskType::Review => ArtifactKind::Review,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Analyze => write!(f, "analyze"),
            TaskType::Plan => write!(f, "plan"),
            TaskType::Implement => write!(f, "implement"),
            TaskType::Test => write!(f, "test"),
            TaskType::Review => write!(f, "review"),
        }
    }
}

/// Tie-break among simultaneously ready tasks. `Critical` sorts first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Accepts `urgent` when deserializing.
    #[serde(alias = "urgent")]
    Critical,
    /// Ahead of the default.
    High,
    /// Default.
    #[default]
    Medium,
    /// Dispatched last among ready tasks.
    Low,
}

/// Status of a task within a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or for a dispatch slot.
    Pending,
    /// Selected into the current dispatch batch, not yet started.
    Ready,
    /// An invocation is in flight.
    Running,
    /// Finished with an artifact.
    Done,
    /// Out of retries or failed terminally.
    Failed,
    /// Never dispatched: a dependency failed or the mission stopped.
    Skipped,
}

impl TaskStatus {
    /// Done, failed or skipped.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Skipped)
    }

    /// Whether the state machine allows `self -> next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Running)
                | (Pending, Skipped)
                | (Ready, Running)
                | (Ready, Pending)
                | (Ready, Failed)
                | (Ready, Skipped)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Pending)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    /// Created, not yet planned.
    Pending,
    /// Waiting on the planner.
    Planning,
    /// Tasks are being dispatched.
    Running,
    /// Every task settled and none failed.
    Completed,
    /// Planning failed, a task failed, or the engine faulted.
    Failed,
    /// Stopped by the caller.
    Aborted,
}

impl MissionStatus {
    /// Completed, failed or aborted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MissionStatus::Completed | MissionStatus::Failed | MissionStatus::Aborted
        )
    }

    /// Whether the state machine allows `self -> next`.
    ///
    /// `Planning -> Completed` covers an empty plan.
    pub fn can_transition_to(self, next: MissionStatus) -> bool {
        use MissionStatus::*;
        matches!(
            (self, next),
            (Pending, Planning)
                | (Pending, Failed)
                | (Pending, Aborted)
                | (Planning, Running)
                | (Planning, Completed)
                | (Planning, Failed)
                | (Planning, Aborted)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Aborted)
        )
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MissionStatus::Pending => "pending",
            MissionStatus::Planning => "planning",
            MissionStatus::Running => "running",
            MissionStatus::Completed => "completed",
            MissionStatus::Failed => "failed",
            MissionStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Kind of artifact produced by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Free text.
    Document,
    /// Architecture or design output.
    Blueprint,
    /// Source code.
    Code,
    /// Test code or results.
    Test,
    /// Review notes.
    Review,
    /// Structured data (JSON, schemas).
    Data,
    /// Execution log.
    Log,
}

/// Durable output of a completed task. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact id.
    pub id: Uuid,
    /// Task that produced it.
    pub task_id: Uuid,
    /// Role that produced it.
    pub role: AgentRole,
    /// Content category.
    pub kind: ArtifactKind,
    /// Display title.
    pub title: String,
    /// Agent output.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Creates an artifact with a fresh id, stamped now.
    pub fn new(
        task_id: Uuid,
        role: AgentRole,
        kind: ArtifactKind,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            role,
            kind,
            title: title.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// A unit of planned work assigned to one agent role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task id.
    pub id: Uuid,
    /// Short label.
    pub title: String,
    /// Full instruction. See [`Task::instruction`].
    #[serde(default)]
    pub description: String,
    /// Kind of work.
    pub task_type: TaskType,
    /// Role that executes the task.
    pub role: AgentRole,
    /// Current state.
    pub status: TaskStatus,
    /// Task ids within the same mission that must be `Done` first.
    pub dependencies: Vec<Uuid>,
    /// Dispatch tie-break.
    pub priority: TaskPriority,
    /// Failure of a critical task fails the whole mission.
    #[serde(default)]
    pub critical: bool,
    /// Number of dispatches started for this task.
    #[serde(default)]
    pub attempts: u32,
    /// Current artifact, set on completion.
    pub artifact: Option<Uuid>,
    /// Last failure detail.
    pub error: Option<TaskError>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Pending task with a fresh id and no dependencies.
    pub fn new(title: impl Into<String>, task_type: TaskType, role: AgentRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            task_type,
            role,
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            priority: TaskPriority::default(),
            critical: false,
            attempts: 0,
            artifact: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Sets the instruction.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the dependency ids.
    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the critical flag.
    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Pending, with every dependency in `done`.
    pub fn is_ready(&self, done: &HashSet<Uuid>) -> bool {
        self.status == TaskStatus::Pending && self.dependencies.iter().all(|d| done.contains(d))
    }

    /// The instruction handed to the agent.
    pub fn instruction(&self) -> &str {
        if self.description.is_empty() {
            &self.title
        } else {
            &self.description
        }
    }
}

/// How hard the planner judged a mission to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// A single step or two.
    Simple,
    /// Default.
    #[default]
    Medium,
    /// Many interacting parts.
    Complex,
}

/// The planner's reading of a request, shared with every task's context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionAnalysis {
    /// One-line restatement of the request.
    #[serde(default)]
    pub summary: String,
    /// What the result must do.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Limits the result must respect.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Checks that decide whether the mission succeeded.
    #[serde(default, alias = "acceptanceCriteria")]
    pub acceptance_criteria: Vec<String>,
    /// Planner's estimate.
    #[serde(default, alias = "estimatedComplexity")]
    pub estimated_complexity: Complexity,
    /// Free-form strategy.
    #[serde(default, alias = "suggestedApproach")]
    pub suggested_approach: String,
}

impl MissionAnalysis {
    /// Analysis with only a summary.
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }

    /// Sets the requirements.
    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.requirements = requirements;
        self
    }

    /// Sets the constraints.
    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }
}

/// A user-initiated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    /// Mission id.
    pub id: Uuid,
    /// The user's request, verbatim.
    pub request: String,
    /// Current lifecycle state.
    pub status: MissionStatus,
    /// Task ids in planning order.
    pub task_ids: Vec<Uuid>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the first task was dispatched.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the mission reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the mission failed or was aborted.
    pub error: Option<TaskError>,
    /// Set when the plan is recorded, if the planner produced one.
    #[serde(default)]
    pub analysis: Option<MissionAnalysis>,
    /// Total USD spent across all tasks.
    pub cost_usd: f64,
    /// Total tokens across all tasks.
    pub usage: TokenUsage,
}

impl Mission {
    /// Pending mission with no tasks.
    pub fn new(id: Uuid, request: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            request: request.into(),
            status: MissionStatus::Pending,
            task_ids: Vec::new(),
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
            analysis: None,
            cost_usd: 0.0,
            usage: TokenUsage::default(),
        }
    }
}

/// Run-time status of a role-bound worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// No work queued or running.
    Idle,
    /// A task is queued for this role but has not started.
    Thinking,
    /// An invocation is running.
    Working,
    /// The mission ended.
    Done,
    /// The role's last task failed and nothing else is queued.
    Error,
}

/// Real-time snapshot of an agent worker's state within one mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Role this state belongs to.
    pub role: AgentRole,
    /// Derived status.
    pub status: AgentStatus,
    /// Running task, or the queued one when none runs.
    pub current_task: Option<Uuid>,
    /// Invocations currently running for this role.
    pub in_flight: u32,
    /// USD spent by this role.
    pub cost_usd: f64,
    /// Tokens consumed by this role.
    pub usage: TokenUsage,
    /// Tasks completed.
    pub completed: u32,
    /// Failed attempts, retries included.
    pub errors: u32,
}

impl AgentState {
    /// Idle state with zeroed counters.
    pub fn new(role: AgentRole) -> Self {
        Self {
            role,
            status: AgentStatus::Idle,
            current_task: None,
            in_flight: 0,
            cost_usd: 0.0,
            usage: TokenUsage::default(),
            completed: 0,
            errors: 0,
        }
    }
}
