use crate::types::{AgentRole, Artifact, MissionAnalysis, MissionStatus, Task};
use chrono::{DateTime, Utc};
use convoy_agent::TokenUsage;
use convoy_core::TaskError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry of a mission's append-only log.
///
/// `seq` is dense and starts at 0. Replaying a mission's events in `seq`
/// order rebuilds its store exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionEvent {
    /// Position in the mission's log, starting at 0.
    pub seq: u64,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Mission the event belongs to.
    pub mission_id: Uuid,
    /// What happened.
    pub kind: EventKind,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Always the first event of a log.
    MissionCreated {
        /// The user's request.
        request: String,
    },
    /// The mission moved to a new lifecycle state.
    MissionStatusChanged {
        /// New status.
        status: MissionStatus,
        /// Failure detail, for failed and aborted missions.
        error: Option<TaskError>,
    },
    /// A validated batch of tasks entered the task table.
    TasksPlanned {
        /// Tasks as planned, all pending.
        tasks: Vec<Task>,
        /// Planner analysis recorded with the batch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        analysis: Option<MissionAnalysis>,
    },
    /// Selected into the current dispatch batch.
    TaskQueued {
        /// Task concerned.
        task_id: Uuid,
    },
    /// An attempt began.
    TaskStarted {
        /// Task concerned.
        task_id: Uuid,
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Catalog id of the model invoked.
        model: String,
    },
    ArtifactCreated {
        /// The new artifact.
        artifact: Artifact,
    },
    /// The task finished with `artifact_id`.
    TaskCompleted {
        /// Task concerned.
        task_id: Uuid,
        /// Artifact concerned.
        artifact_id: Uuid,
        /// Tokens consumed by the attempt.
        usage: TokenUsage,
        /// USD cost of the attempt.
        cost_usd: f64,
    },
    /// A failed attempt that will be dispatched again.
    TaskRetrying {
        /// Task concerned.
        task_id: Uuid,
        /// The attempt that failed.
        attempt: u32,
        /// Failure detail.
        error: TaskError,
    },
    /// The task failed terminally.
    TaskFailed {
        /// Task concerned.
        task_id: Uuid,
        /// Failure detail.
        error: TaskError,
        /// Downstream tasks skipped by this failure.
        skipped: Vec<Uuid>,
    },
    /// Skipped because the mission stopped dispatching.
    TaskSkipped {
        /// Task concerned.
        task_id: Uuid,
        /// Failure detail.
        error: TaskError,
    },
    /// Returned from the batch to pending without being started.
    TaskRequeued {
        /// Task concerned.
        task_id: Uuid,
    },
    /// An artifact was deleted.
    ArtifactRemoved {
        /// Artifact concerned.
        artifact_id: Uuid,
    },
    /// An idle agent's counters were cleared.
    AgentReset {
        /// Role concerned.
        role: AgentRole,
    },
}

impl EventKind {
    /// Stable snake_case name, as written in the `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::MissionCreated { .. } => "mission_created",
            EventKind::MissionStatusChanged { .. } => "mission_status_changed",
            EventKind::TasksPlanned { .. } => "tasks_planned",
            EventKind::TaskQueued { .. } => "task_queued",
            EventKind::TaskStarted { .. } => "task_started",
            EventKind::ArtifactCreated { .. } => "artifact_created",
            EventKind::TaskCompleted { .. } => "task_completed",
            EventKind::TaskRetrying { .. } => "task_retrying",
            EventKind::TaskFailed { .. } => "task_failed",
            EventKind::TaskSkipped { .. } => "task_skipped",
            EventKind::TaskRequeued { .. } => "task_requeued",
            EventKind::ArtifactRemoved { .. } => "artifact_removed",
            EventKind::AgentReset { .. } => "agent_reset",
        }
    }

    /// The task this event concerns, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            EventKind::TaskQueued { task_id }
            | EventKind::TaskStarted { task_id, .. }
            | EventKind::TaskCompleted { task_id, .. }
            | EventKind::TaskRetrying { task_id, .. }
            | EventKind::TaskFailed { task_id, .. }
            | EventKind::TaskSkipped { task_id, .. }
            | EventKind::TaskRequeued { task_id } => Some(*task_id),
            EventKind::ArtifactCreated { artifact } => Some(artifact.task_id),
            _ => None,
        }
    }
}
