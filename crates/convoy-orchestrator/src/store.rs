use crate::event::{EventKind, MissionEvent};
use crate::scheduler::{TaskCounts, TaskScheduler};
use crate::sink::EventSink;
use crate::types::{
    AgentRole, AgentState, AgentStatus, Artifact, Mission, MissionAnalysis, MissionStatus, Task,
    TaskStatus,
};
use chrono::Utc;
use convoy_agent::TokenUsage;
use convoy_core::{ConvoyError, ConvoyResult, TaskError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Point-in-time copy of everything a mission store holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionSnapshot {
    /// Mission record.
    pub mission: Mission,
    /// Tasks in insertion order.
    pub tasks: Vec<Task>,
    /// Artifacts in creation order.
    pub artifacts: Vec<Artifact>,
    /// One entry per role that has seen work.
    pub agents: Vec<AgentState>,
    /// Per-status task counts.
    pub counts: TaskCounts,
    /// Events committed so far.
    pub event_count: usize,
}

impl MissionSnapshot {
    /// Task with the given id.
    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// First task with the given title.
    pub fn task_by_title(&self, title: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.title == title)
    }

    /// First artifact produced by `task_id`.
    pub fn artifact_for(&self, task_id: Uuid) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.task_id == task_id)
    }

    /// State of the agent for `role`.
    pub fn agent(&self, role: AgentRole) -> Option<&AgentState> {
        self.agents.iter().find(|a| a.role == role)
    }
}

/// Event-sourced state of one mission.
///
/// Every mutation goes through [`MissionStore::commit`]: the event is applied
/// first and appended only if it applied cleanly, so the log never records a
/// change the state rejected. Lifecycle timestamps come from the event, which
/// makes [`MissionStore::replay`] reproduce the same state.
pub struct MissionStore {
    mission: Mission,
    scheduler: TaskScheduler,
    artifacts: Vec<Artifact>,
    agents: BTreeMap<AgentRole, AgentState>,
    events: Vec<MissionEvent>,
    notifier: broadcast::Sender<MissionEvent>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MissionStore {
    fn blank(mission: Mission) -> Self {
        let (notifier, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            mission,
            scheduler: TaskScheduler::new(),
            artifacts: Vec::new(),
            agents: BTreeMap::new(),
            events: Vec::new(),
            notifier,
            sinks: Vec::new(),
        }
    }

    /// Start a new mission in `Pending`.
    pub fn create(request: impl Into<String>) -> Self {
        Self::create_with_sinks(request, Vec::new())
    }

    /// Start a new mission whose events, including creation, reach `sinks`.
    pub fn create_with_sinks(request: impl Into<String>, sinks: Vec<Arc<dyn EventSink>>) -> Self {
        let request = request.into();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut store = Self::blank(Mission::new(id, request.clone(), now));
        store.sinks = sinks;
        store.record(MissionEvent {
            seq: 0,
            timestamp: now,
            mission_id: id,
            kind: EventKind::MissionCreated { request },
        });
        store
    }

    /// Rebuild a store from its event log.
    ///
    /// The log must open with `MissionCreated`, belong to one mission and have
    /// dense sequence numbers.
    pub fn replay(events: impl IntoIterator<Item = MissionEvent>) -> ConvoyResult<Self> {
        let mut events = events.into_iter();
        let first = events
            .next()
            .ok_or_else(|| ConvoyError::Replay("empty event log".into()))?;
        let EventKind::MissionCreated { request } = &first.kind else {
            return Err(ConvoyError::Replay(format!(
                "log starts with {} instead of mission_created",
                first.kind.name()
            )));
        };
        if first.seq != 0 {
            return Err(ConvoyError::Replay(format!("first event has seq {}", first.seq)));
        }

        let mut store = Self::blank(Mission::new(
            first.mission_id,
            request.clone(),
            first.timestamp,
        ));
        store.events.push(first);

        for event in events {
            if event.mission_id != store.mission.id {
                return Err(ConvoyError::Replay(format!(
                    "event {} belongs to mission {}",
                    event.seq, event.mission_id
                )));
            }
            if event.seq != store.events.len() as u64 {
                return Err(ConvoyError::Replay(format!(
                    "expected seq {}, found {}",
                    store.events.len(),
                    event.seq
                )));
            }
            store.apply(&event)?;
            store.events.push(event);
        }
        Ok(store)
    }

    /// Forward every later commit to `sink`.
    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Live feed of events committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MissionEvent> {
        self.notifier.subscribe()
    }

    /// Apply and append one event.
    pub fn commit(&mut self, kind: EventKind) -> ConvoyResult<()> {
        let event = MissionEvent {
            seq: self.events.len() as u64,
            timestamp: Utc::now(),
            mission_id: self.mission.id,
            kind,
        };
        self.apply(&event)?;
        self.record(event);
        Ok(())
    }

    fn record(&mut self, event: MissionEvent) {
        debug!(
            mission_id = %event.mission_id,
            seq = event.seq,
            event = event.kind.name(),
            "Event committed"
        );
        for sink in &self.sinks {
            if let Err(e) = sink.publish(&event) {
                warn!(mission_id = %event.mission_id, seq = event.seq, error = %e, "Event sink failed");
            }
        }
        // No subscribers is fine.
        let _ = self.notifier.send(event.clone());
        self.events.push(event);
    }

    fn apply(&mut self, event: &MissionEvent) -> ConvoyResult<()> {
        let at = event.timestamp;
        match &event.kind {
            EventKind::MissionCreated { .. } => Err(ConvoyError::Replay(format!(
                "mission {} already created",
                self.mission.id
            ))),

            EventKind::MissionStatusChanged { status, error } => {
                let from = self.mission.status;
                if !from.can_transition_to(*status) {
                    return Err(ConvoyError::InvalidTransition {
                        entity: self.mission.id,
                        from: from.to_string(),
                        to: status.to_string(),
                    });
                }
                self.mission.status = *status;
                if let Some(error) = error {
                    self.mission.error = Some(error.clone());
                }
                if *status == MissionStatus::Running {
                    self.mission.started_at = Some(at);
                }
                if status.is_terminal() {
                    self.mission.completed_at = Some(at);
                    for agent in self.agents.values_mut() {
                        agent.current_task = None;
                        if agent.status != AgentStatus::Error {
                            agent.status = AgentStatus::Done;
                        }
                    }
                }
                Ok(())
            }

            EventKind::TasksPlanned { tasks, analysis } => {
                self.scheduler.ingest(tasks.clone())?;
                self.mission.task_ids.extend(tasks.iter().map(|t| t.id));
                if analysis.is_some() {
                    self.mission.analysis.clone_from(analysis);
                }
                Ok(())
            }

            EventKind::TaskQueued { task_id } => {
                self.scheduler.transition_at(*task_id, TaskStatus::Ready, at)?;
                self.refresh_agent(*task_id, false);
                Ok(())
            }

            EventKind::TaskStarted { task_id, .. } => {
                self.scheduler.transition_at(*task_id, TaskStatus::Running, at)?;
                self.refresh_agent(*task_id, false);
                Ok(())
            }

            EventKind::ArtifactCreated { artifact } => {
                if self.scheduler.get(artifact.task_id).is_none() {
                    return Err(ConvoyError::UnknownTask(artifact.task_id));
                }
                if self.artifacts.iter().any(|a| a.id == artifact.id) {
                    return Err(ConvoyError::Replay(format!(
                        "artifact {} already exists",
                        artifact.id
                    )));
                }
                self.artifacts.push(artifact.clone());
                Ok(())
            }

            EventKind::TaskCompleted {
                task_id,
                artifact_id,
                usage,
                cost_usd,
            } => {
                if !self.artifacts.iter().any(|a| a.id == *artifact_id) {
                    return Err(ConvoyError::Replay(format!(
                        "task {task_id} completed with unknown artifact {artifact_id}"
                    )));
                }
                self.scheduler.transition_at(*task_id, TaskStatus::Done, at)?;
                self.scheduler.set_artifact(*task_id, Some(*artifact_id));
                self.mission.cost_usd += cost_usd;
                self.mission.usage += *usage;
                if let Some(agent) = self.agent_for_task(*task_id) {
                    agent.completed += 1;
                    agent.cost_usd += cost_usd;
                    agent.usage += *usage;
                }
                self.refresh_agent(*task_id, false);
                Ok(())
            }

            EventKind::TaskRetrying { task_id, error, .. } => {
                self.scheduler.transition_at(*task_id, TaskStatus::Pending, at)?;
                self.scheduler.set_error(*task_id, error.clone());
                self.count_agent_error(*task_id);
                self.refresh_agent(*task_id, true);
                Ok(())
            }

            EventKind::TaskFailed {
                task_id,
                error,
                skipped,
            } => {
                self.scheduler.fail_at(*task_id, error.clone(), skipped, at)?;
                self.count_agent_error(*task_id);
                self.refresh_agent(*task_id, true);
                for id in skipped {
                    self.refresh_agent(*id, false);
                }
                Ok(())
            }

            EventKind::TaskSkipped { task_id, error } => {
                self.scheduler.skip_at(*task_id, error.clone(), at)?;
                self.refresh_agent(*task_id, false);
                Ok(())
            }

            EventKind::TaskRequeued { task_id } => {
                let status = self
                    .scheduler
                    .get(*task_id)
                    .map(|t| t.status)
                    .ok_or(ConvoyError::UnknownTask(*task_id))?;
                if status != TaskStatus::Ready {
                    return Err(ConvoyError::InvalidTransition {
                        entity: *task_id,
                        from: status.to_string(),
                        to: TaskStatus::Pending.to_string(),
                    });
                }
                self.scheduler.transition_at(*task_id, TaskStatus::Pending, at)?;
                self.refresh_agent(*task_id, false);
                Ok(())
            }

            EventKind::ArtifactRemoved { artifact_id } => {
                let pos = self
                    .artifacts
                    .iter()
                    .position(|a| a.id == *artifact_id)
                    .ok_or_else(|| {
                        ConvoyError::Replay(format!("unknown artifact {artifact_id}"))
                    })?;
                let removed = self.artifacts.remove(pos);
                if self
                    .scheduler
                    .get(removed.task_id)
                    .is_some_and(|t| t.artifact == Some(removed.id))
                {
                    self.scheduler.set_artifact(removed.task_id, None);
                }
                Ok(())
            }

            EventKind::AgentReset { role } => {
                if let Some(agent) = self.agents.get(role) {
                    if agent.in_flight > 0 {
                        return Err(ConvoyError::InvalidTransition {
                            entity: self.mission.id,
                            from: format!("{role} working"),
                            to: format!("{role} reset"),
                        });
                    }
                }
                self.agents.remove(role);
                Ok(())
            }
        }
    }

    fn agent_for_task(&mut self, task_id: Uuid) -> Option<&mut AgentState> {
        let role = self.scheduler.get(task_id)?.role;
        Some(
            self.agents
                .entry(role)
                .or_insert_with(|| AgentState::new(role)),
        )
    }

    fn count_agent_error(&mut self, task_id: Uuid) {
        if let Some(agent) = self.agent_for_task(task_id) {
            agent.errors += 1;
        }
    }

    /// Recompute the status of the agent owning `task_id` from the task table.
    fn refresh_agent(&mut self, task_id: Uuid, failed: bool) {
        let Some(role) = self.scheduler.get(task_id).map(|t| t.role) else {
            return;
        };
        let mut running = None;
        let mut in_flight = 0;
        let mut queued = None;
        for task in self.scheduler.tasks().iter().filter(|t| t.role == role) {
            match task.status {
                TaskStatus::Running => {
                    in_flight += 1;
                    running.get_or_insert(task.id);
                }
                TaskStatus::Ready => {
                    queued.get_or_insert(task.id);
                }
                _ => {}
            }
        }

        // Roles that were never dispatched stay out of the agent table.
        if !failed && running.is_none() && queued.is_none() && !self.agents.contains_key(&role) {
            return;
        }
        let agent = self
            .agents
            .entry(role)
            .or_insert_with(|| AgentState::new(role));
        agent.in_flight = in_flight;
        agent.current_task = running.or(queued);
        agent.status = if running.is_some() {
            AgentStatus::Working
        } else if queued.is_some() {
            AgentStatus::Thinking
        } else if failed {
            AgentStatus::Error
        } else {
            AgentStatus::Idle
        };
    }

    // --- Mutations ---

    /// Move the mission to `status`, recording `error` if given.
    pub fn set_status(&mut self, status: MissionStatus, error: Option<TaskError>) -> ConvoyResult<()> {
        self.commit(EventKind::MissionStatusChanged { status, error })
    }

    /// Ingest a planned batch. A rejected batch commits nothing.
    pub fn add_tasks(&mut self, tasks: Vec<Task>) -> ConvoyResult<()> {
        self.commit(EventKind::TasksPlanned {
            tasks,
            analysis: None,
        })
    }

    /// Ingest a plan and record the planner's analysis with it.
    pub fn add_plan(
        &mut self,
        tasks: Vec<Task>,
        analysis: Option<MissionAnalysis>,
    ) -> ConvoyResult<()> {
        self.commit(EventKind::TasksPlanned { tasks, analysis })
    }

    /// Mark a pending task ready for dispatch.
    pub fn queue_task(&mut self, task_id: Uuid) -> ConvoyResult<()> {
        self.commit(EventKind::TaskQueued { task_id })
    }

    /// Mark a task running. Returns the attempt number, starting at 1.
    pub fn start_task(&mut self, task_id: Uuid, model: &str) -> ConvoyResult<u32> {
        let attempt = self
            .scheduler
            .get(task_id)
            .map(|t| t.attempts + 1)
            .ok_or(ConvoyError::UnknownTask(task_id))?;
        self.commit(EventKind::TaskStarted {
            task_id,
            attempt,
            model: model.to_string(),
        })?;
        Ok(attempt)
    }

    /// Store the artifact of a running task and mark the task done.
    pub fn complete_task(
        &mut self,
        task_id: Uuid,
        artifact: Artifact,
        usage: TokenUsage,
        cost_usd: f64,
    ) -> ConvoyResult<()> {
        let status = self
            .scheduler
            .get(task_id)
            .map(|t| t.status)
            .ok_or(ConvoyError::UnknownTask(task_id))?;
        if status != TaskStatus::Running {
            return Err(ConvoyError::InvalidTransition {
                entity: task_id,
                from: status.to_string(),
                to: TaskStatus::Done.to_string(),
            });
        }
        let artifact_id = artifact.id;
        self.commit(EventKind::ArtifactCreated { artifact })?;
        self.commit(EventKind::TaskCompleted {
            task_id,
            artifact_id,
            usage,
            cost_usd,
        })
    }

    /// Record a failed attempt and return the task to pending.
    pub fn retry_task(&mut self, task_id: Uuid, error: TaskError) -> ConvoyResult<()> {
        let attempt = self
            .scheduler
            .get(task_id)
            .map(|t| t.attempts)
            .ok_or(ConvoyError::UnknownTask(task_id))?;
        self.commit(EventKind::TaskRetrying {
            task_id,
            attempt,
            error,
        })
    }

    /// Fail a task terminally. Returns the downstream tasks skipped with it.
    pub fn fail_task(&mut self, task_id: Uuid, error: TaskError) -> ConvoyResult<Vec<Uuid>> {
        let skipped = self.scheduler.cascade_targets(task_id);
        self.commit(EventKind::TaskFailed {
            task_id,
            error,
            skipped: skipped.clone(),
        })?;
        Ok(skipped)
    }

    /// Skip a task that has not started.
    pub fn skip_task(&mut self, task_id: Uuid, error: TaskError) -> ConvoyResult<()> {
        self.commit(EventKind::TaskSkipped { task_id, error })
    }

    /// Return a queued task to pending without starting it.
    pub fn requeue_task(&mut self, task_id: Uuid) -> ConvoyResult<()> {
        self.commit(EventKind::TaskRequeued { task_id })
    }

    /// Skip every task that has not started. Returns the skipped ids.
    pub fn halt(&mut self, error: TaskError) -> ConvoyResult<Vec<Uuid>> {
        let unstarted = self.scheduler.unstarted();
        for id in &unstarted {
            self.skip_task(*id, error.clone())?;
        }
        Ok(unstarted)
    }

    /// Delete an artifact and clear the task's reference to it.
    pub fn remove_artifact(&mut self, artifact_id: Uuid) -> ConvoyResult<()> {
        self.commit(EventKind::ArtifactRemoved { artifact_id })
    }

    /// Drop an idle agent's accumulated state.
    pub fn reset_agent(&mut self, role: AgentRole) -> ConvoyResult<()> {
        self.commit(EventKind::AgentReset { role })
    }

    // --- Selectors ---

    /// Mission id.
    pub fn id(&self) -> Uuid {
        self.mission.id
    }

    /// Current mission record.
    pub fn mission(&self) -> &Mission {
        &self.mission
    }

    /// Current mission status.
    pub fn status(&self) -> MissionStatus {
        self.mission.status
    }

    /// Task table.
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Task with the given id.
    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.scheduler.get(id)
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        self.scheduler.tasks()
    }

    /// Artifact with the given id.
    pub fn artifact(&self, id: Uuid) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.id == id)
    }

    /// Artifacts in creation order.
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Artifacts produced by `task_id`.
    pub fn artifacts_for(&self, task_id: Uuid) -> Vec<&Artifact> {
        self.artifacts.iter().filter(|a| a.task_id == task_id).collect()
    }

    /// State of the agent for `role`.
    pub fn agent(&self, role: AgentRole) -> Option<&AgentState> {
        self.agents.get(&role)
    }

    /// Agent states.
    pub fn agents(&self) -> impl Iterator<Item = &AgentState> {
        self.agents.values()
    }

    /// The committed log.
    pub fn events(&self) -> &[MissionEvent] {
        &self.events
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> MissionSnapshot {
        MissionSnapshot {
            mission: self.mission.clone(),
            tasks: self.scheduler.tasks().to_vec(),
            artifacts: self.artifacts.clone(),
            agents: self.agents.values().cloned().collect(),
            counts: self.scheduler.counts(),
            event_count: self.events.len(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::types::{ArtifactKind, TaskType};
    use convoy_core::ErrorKind;

    fn planned() -> (MissionStore, Uuid, Uuid) {
        let mut store = MissionStore::create("build a todo app");
        store.set_status(MissionStatus::Planning, None).unwrap();
        let a = Task::new("design", TaskType::Plan, AgentRole::Planner);
        let b = Task::new("build", TaskType::Implement, AgentRole::Implementer)
            .with_dependencies(vec![a.id]);
        let (a_id, b_id) = (a.id, b.id);
        store.add_tasks(vec![a, b]).unwrap();
        store.set_status(MissionStatus::Running, None).unwrap();
        (store, a_id, b_id)
    }

    fn finish(store: &mut MissionStore, id: Uuid) {
        store.queue_task(id).unwrap();
        store.start_task(id, "gemini-2.0-flash").unwrap();
        let role = store.task(id).unwrap().role;
        let artifact = Artifact::new(id, role, ArtifactKind::Document, "out", "content");
        store
            .complete_task(id, artifact, TokenUsage::new(100, 50), 0.01)
            .unwrap();
    }

    #[test]
    fn test_create_records_first_event() {
        let store = MissionStore::create("hello");
        assert_eq!(store.status(), MissionStatus::Pending);
        assert_eq!(store.events().len(), 1);
        assert_eq!(store.events()[0].seq, 0);
        assert_eq!(store.events()[0].kind.name(), "mission_created");
    }

    #[test]
    fn test_rejected_mutation_appends_nothing() {
        let (mut store, a, _) = planned();
        let before = store.events().len();
        assert!(store.set_status(MissionStatus::Planning, None).is_err());
        assert!(store.start_task(Uuid::new_v4(), "m").is_err());
        assert!(store.requeue_task(a).is_err());
        let cyclic = {
            let mut t = Task::new("loop", TaskType::Test, AgentRole::Tester);
            t.dependencies = vec![t.id];
            t
        };
        assert!(store.add_tasks(vec![cyclic]).is_err());
        assert_eq!(store.events().len(), before);
        assert_eq!(store.tasks().len(), 2);
    }

    #[test]
    fn test_completion_links_artifact_and_cost() {
        let (mut store, a, _) = planned();
        finish(&mut store, a);

        let task = store.task(a).unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        let artifact = store.artifact(task.artifact.unwrap()).unwrap();
        assert_eq!(artifact.task_id, a);
        assert!((store.mission().cost_usd - 0.01).abs() < 1e-12);
        assert_eq!(store.mission().usage, TokenUsage::new(100, 50));

        let planner = store.agent(AgentRole::Planner).unwrap();
        assert_eq!(planner.status, AgentStatus::Idle);
        assert_eq!(planner.completed, 1);
        assert_eq!(planner.in_flight, 0);
    }

    #[test]
    fn test_agent_status_follows_dispatch() {
        let (mut store, a, _) = planned();
        store.queue_task(a).unwrap();
        assert_eq!(store.agent(AgentRole::Planner).unwrap().status, AgentStatus::Thinking);
        store.start_task(a, "m").unwrap();
        let agent = store.agent(AgentRole::Planner).unwrap();
        assert_eq!(agent.status, AgentStatus::Working);
        assert_eq!(agent.current_task, Some(a));
        assert_eq!(agent.in_flight, 1);

        store
            .retry_task(a, TaskError::new(ErrorKind::Provider, "503"))
            .unwrap();
        let agent = store.agent(AgentRole::Planner).unwrap();
        assert_eq!(agent.status, AgentStatus::Error);
        assert_eq!(agent.errors, 1);
        assert_eq!(store.task(a).unwrap().status, TaskStatus::Pending);

        assert!(store.reset_agent(AgentRole::Planner).is_ok());
        assert!(store.agent(AgentRole::Planner).is_none());
    }

    #[test]
    fn test_failure_event_carries_skipped() {
        let (mut store, a, b) = planned();
        store.queue_task(a).unwrap();
        store.start_task(a, "m").unwrap();
        let skipped = store
            .fail_task(a, TaskError::new(ErrorKind::Provider, "down"))
            .unwrap();
        assert_eq!(skipped, vec![b]);
        match &store.events().last().unwrap().kind {
            EventKind::TaskFailed { skipped, .. } => assert_eq!(skipped, &vec![b]),
            other => panic!("unexpected event {}", other.name()),
        }
        assert_eq!(store.task(b).unwrap().status, TaskStatus::Skipped);
    }

    #[test]
    fn test_terminal_status_settles_agents() {
        let (mut store, a, b) = planned();
        finish(&mut store, a);
        finish(&mut store, b);
        store.set_status(MissionStatus::Completed, None).unwrap();
        assert!(store.agents().all(|a| a.status == AgentStatus::Done));
        assert!(store.mission().completed_at.is_some());
        assert!(store.scheduler().is_settled());
    }

    #[test]
    fn test_reset_agent_refused_while_working() {
        let (mut store, a, _) = planned();
        store.queue_task(a).unwrap();
        store.start_task(a, "m").unwrap();
        let before = store.events().len();
        assert!(store.reset_agent(AgentRole::Planner).is_err());
        assert_eq!(store.events().len(), before);

        let artifact = Artifact::new(a, AgentRole::Planner, ArtifactKind::Blueprint, "out", "x");
        store
            .complete_task(a, artifact, TokenUsage::default(), 0.0)
            .unwrap();
        store.reset_agent(AgentRole::Planner).unwrap();
        assert!(store.agent(AgentRole::Planner).is_none());
    }

    #[test]
    fn test_remove_artifact_unlinks_task() {
        let (mut store, a, _) = planned();
        finish(&mut store, a);
        let artifact_id = store.task(a).unwrap().artifact.unwrap();
        store.remove_artifact(artifact_id).unwrap();
        assert!(store.artifacts().is_empty());
        assert_eq!(store.task(a).unwrap().artifact, None);
        assert!(store.remove_artifact(artifact_id).is_err());
    }

    #[test]
    fn test_replay_reproduces_snapshot() {
        let (mut store, a, b) = planned();
        finish(&mut store, a);
        store.queue_task(b).unwrap();
        store.requeue_task(b).unwrap();
        store.queue_task(b).unwrap();
        store.start_task(b, "m").unwrap();
        store
            .fail_task(b, TaskError::new(ErrorKind::Timeout, "Timeout after 10ms"))
            .unwrap();
        store.set_status(MissionStatus::Completed, None).unwrap();

        let replayed = MissionStore::replay(store.events().to_vec()).unwrap();
        assert_eq!(replayed.snapshot(), store.snapshot());
        assert_eq!(replayed.events(), store.events());
    }

    #[test]
    fn test_replay_rejects_bad_logs() {
        let (store, _, _) = planned();
        let events = store.events().to_vec();

        assert!(MissionStore::replay(Vec::new()).is_err());
        assert!(MissionStore::replay(events[1..].to_vec()).is_err());

        let mut gap = events.clone();
        gap.remove(1);
        assert!(matches!(
            MissionStore::replay(gap),
            Err(ConvoyError::Replay(_))
        ));
    }

    #[test]
    fn test_sink_and_subscriber_see_events() {
        let sink = Arc::new(MemorySink::new());
        let mut store = MissionStore::create_with_sinks("watch me", vec![sink.clone()]);
        let mut rx = store.subscribe();
        store.set_status(MissionStatus::Planning, None).unwrap();

        assert_eq!(sink.len(), 2);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.seq, 1);
        assert_eq!(received.kind.name(), "mission_status_changed");
    }
}
