use crate::event::MissionEvent;
use crate::invoker::{InvocationOutput, InvocationRequest};
use crate::planner::{plan_to_tasks, Planner};
use crate::pool::AgentPool;
use crate::sink::EventSink;
use crate::store::{MissionSnapshot, MissionStore};
use crate::types::{Artifact, MissionStatus, Task};
use convoy_agent::RetryPolicy;
use convoy_core::{ConvoyError, ConvoyResult, ErrorKind, TaskError};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How ready tasks are dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Up to `max_concurrency` ready tasks per batch.
    #[default]
    Parallel,
    /// One task at a time, in topological order.
    Sequential,
}

/// Per-mission execution settings.
#[derive(Debug, Clone)]
pub struct MissionOptions {
    /// Largest dispatch batch. Zero behaves like one.
    pub max_concurrency: usize,
    /// Retry budget and backoff for retryable failures.
    pub retry: RetryPolicy,
    /// Bound on each agent call.
    pub task_timeout: Duration,
    /// Plan indices whose failure fails the mission, in addition to items
    /// flagged `critical`.
    pub critical_tasks: HashSet<usize>,
    /// Parallel batches or one task at a time.
    pub mode: ExecutionMode,
}

impl Default for MissionOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            retry: RetryPolicy::default(),
            task_timeout: Duration::from_secs(120),
            critical_tasks: HashSet::new(),
            mode: ExecutionMode::Parallel,
        }
    }
}

impl MissionOptions {
    /// Set the batch size limit.
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-call timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Mark one more plan index as mission-critical.
    pub fn with_critical_task(mut self, plan_index: usize) -> Self {
        self.critical_tasks.insert(plan_index);
        self
    }

    /// Dispatch one task at a time in topological order.
    pub fn sequential(mut self) -> Self {
        self.mode = ExecutionMode::Sequential;
        self
    }
}

struct MissionHandle {
    store: Arc<RwLock<MissionStore>>,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Runs missions: plans each request, then dispatches its task graph to the
/// agent pool in dependency order.
///
/// Callers never see a mission error directly. Failures are recorded on the
/// mission and its tasks and are visible through the read accessors.
pub struct Orchestrator {
    pool: Arc<AgentPool>,
    planner: Arc<dyn Planner>,
    sinks: Vec<Arc<dyn EventSink>>,
    missions: RwLock<HashMap<Uuid, Arc<MissionHandle>>>,
}

impl Orchestrator {
    /// An orchestrator with no sinks and no missions.
    pub fn new(pool: Arc<AgentPool>, planner: Arc<dyn Planner>) -> Self {
        Self {
            pool,
            planner,
            sinks: Vec::new(),
            missions: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a sink to every mission started from now on.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// The shared agent pool. Model updates made here reach later dispatches.
    pub fn pool(&self) -> &Arc<AgentPool> {
        &self.pool
    }

    fn prepare_run(
        &self,
        request: String,
        options: MissionOptions,
    ) -> (Uuid, MissionRun) {
        let store = MissionStore::create_with_sinks(request, self.sinks.clone());
        let mission_id = store.id();
        let store = Arc::new(RwLock::new(store));
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        self.missions.write().insert(
            mission_id,
            Arc::new(MissionHandle {
                store: store.clone(),
                cancel: cancel.clone(),
                done: done_rx,
            }),
        );

        let run = MissionRun {
            mission_id,
            store,
            pool: self.pool.clone(),
            planner: self.planner.clone(),
            options,
            cancel,
            done: done_tx,
        };
        (mission_id, run)
    }

    /// Spawn a mission on the tokio runtime and return its id immediately.
    pub fn start_mission(&self, request: impl Into<String>, options: MissionOptions) -> Uuid {
        let (mission_id, run) = self.prepare_run(request.into(), options);
        info!(mission_id = %mission_id, "Mission started");
        tokio::spawn(run.run());
        mission_id
    }

    /// Run a mission on the current task and return its final snapshot.
    pub async fn run_mission(
        &self,
        request: impl Into<String>,
        options: MissionOptions,
    ) -> MissionSnapshot {
        let (mission_id, run) = self.prepare_run(request.into(), options);
        info!(mission_id = %mission_id, "Mission started inline");
        let store = run.store.clone();
        run.run().await;
        let snapshot = store.read().snapshot();
        snapshot
    }

    /// Stop dispatching new tasks. In-flight calls settle first.
    pub fn abort_mission(&self, mission_id: Uuid) -> ConvoyResult<()> {
        let handle = self.handle(mission_id)?;
        if !handle.cancel.is_cancelled() {
            warn!(mission_id = %mission_id, "Mission abort requested");
            handle.cancel.cancel();
        }
        Ok(())
    }

    /// Wait until the mission reaches a terminal state.
    pub async fn wait(&self, mission_id: Uuid) -> ConvoyResult<MissionSnapshot> {
        let handle = self.handle(mission_id)?;
        let mut done = handle.done.clone();
        if done.wait_for(|finished| *finished).await.is_err() {
            error!(mission_id = %mission_id, "Mission task ended without finishing");
        }
        let snapshot = handle.store.read().snapshot();
        Ok(snapshot)
    }

    fn handle(&self, mission_id: Uuid) -> ConvoyResult<Arc<MissionHandle>> {
        self.missions
            .read()
            .get(&mission_id)
            .cloned()
            .ok_or(ConvoyError::UnknownMission(mission_id))
    }

    /// Ids of every mission still held by this orchestrator.
    pub fn missions(&self) -> Vec<Uuid> {
        self.missions.read().keys().copied().collect()
    }

    /// Drop a finished mission and return its final snapshot.
    ///
    /// Missions stay in memory until forgotten. A mission that has not
    /// reached a terminal state is kept and `InvalidTransition` is returned.
    pub fn forget(&self, mission_id: Uuid) -> ConvoyResult<MissionSnapshot> {
        let mut missions = self.missions.write();
        let handle = missions
            .get(&mission_id)
            .ok_or(ConvoyError::UnknownMission(mission_id))?;
        let snapshot = handle.store.read().snapshot();
        if !snapshot.mission.status.is_terminal() {
            return Err(ConvoyError::InvalidTransition {
                entity: mission_id,
                from: snapshot.mission.status.to_string(),
                to: "forgotten".into(),
            });
        }
        missions.remove(&mission_id);
        info!(mission_id = %mission_id, "Mission forgotten");
        Ok(snapshot)
    }

    /// Current mission status.
    pub fn status(&self, mission_id: Uuid) -> ConvoyResult<MissionStatus> {
        Ok(self.handle(mission_id)?.store.read().status())
    }

    /// All tasks in planning order.
    pub fn tasks(&self, mission_id: Uuid) -> ConvoyResult<Vec<Task>> {
        Ok(self.handle(mission_id)?.store.read().tasks().to_vec())
    }

    /// Artifacts in creation order.
    pub fn artifacts(&self, mission_id: Uuid) -> ConvoyResult<Vec<Artifact>> {
        Ok(self.handle(mission_id)?.store.read().artifacts().to_vec())
    }

    /// The full event log so far.
    pub fn events(&self, mission_id: Uuid) -> ConvoyResult<Vec<MissionEvent>> {
        Ok(self.handle(mission_id)?.store.read().events().to_vec())
    }

    /// A consistent copy of the whole mission state.
    pub fn snapshot(&self, mission_id: Uuid) -> ConvoyResult<MissionSnapshot> {
        Ok(self.handle(mission_id)?.store.read().snapshot())
    }

    /// Receive events committed from now on.
    pub fn subscribe(&self, mission_id: Uuid) -> ConvoyResult<broadcast::Receiver<MissionEvent>> {
        Ok(self.handle(mission_id)?.store.read().subscribe())
    }
}

/// Why the dispatch loop stopped.
enum Halt {
    Settled,
    Aborted,
    CriticalFailure(TaskError),
    Stalled,
}

struct Dispatch {
    request: InvocationRequest,
    delay: Duration,
}

/// One mission's driver. Store locks are only taken between awaits.
struct MissionRun {
    mission_id: Uuid,
    store: Arc<RwLock<MissionStore>>,
    pool: Arc<AgentPool>,
    planner: Arc<dyn Planner>,
    options: MissionOptions,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

impl MissionRun {
    async fn run(self) {
        if let Err(e) = self.drive().await {
            error!(mission_id = %self.mission_id, error = %e, "Mission failed on internal error");
            record_internal_failure(&mut self.store.write(), &e);
        }
        let _ = self.done.send(true);
    }

    async fn drive(&self) -> ConvoyResult<()> {
        self.store.write().set_status(MissionStatus::Planning, None)?;
        let request = self.store.read().mission().request.clone();
        info!(mission_id = %self.mission_id, "Mission planning");

        let planned = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.planner.plan(&request) => Some(result),
        };
        let plan = match planned {
            None => return self.finish(MissionStatus::Aborted, Some(aborted())),
            Some(Err(e)) => return self.finish(MissionStatus::Failed, Some(TaskError::from(&e))),
            Some(Ok(plan)) => plan,
        };

        let tasks = match plan_to_tasks(&plan.items, &self.options.critical_tasks) {
            Ok(tasks) => tasks,
            Err(e) => return self.finish(MissionStatus::Failed, Some(TaskError::from(&e))),
        };
        let count = tasks.len();
        let ingested = self.store.write().add_plan(tasks, plan.analysis);
        if let Err(e) = ingested {
            return self.finish(MissionStatus::Failed, Some(TaskError::from(&e)));
        }
        if count == 0 {
            info!(mission_id = %self.mission_id, "Empty plan");
            return self.finish(MissionStatus::Completed, None);
        }

        self.store.write().set_status(MissionStatus::Running, None)?;
        info!(
            mission_id = %self.mission_id,
            tasks = count,
            max_concurrency = self.options.max_concurrency,
            mode = ?self.options.mode,
            "Mission running"
        );

        match self.dispatch_loop().await? {
            Halt::Settled => self.finish(MissionStatus::Completed, None),
            Halt::Aborted => {
                let skipped = self.store.write().halt(TaskError::new(
                    ErrorKind::Aborted,
                    "mission aborted before dispatch",
                ))?;
                if !skipped.is_empty() {
                    warn!(mission_id = %self.mission_id, skipped = skipped.len(), "Skipped undispatched tasks");
                }
                self.finish(MissionStatus::Aborted, Some(aborted()))
            }
            Halt::CriticalFailure(err) => {
                let skipped = self.store.write().halt(TaskError::new(
                    ErrorKind::MissionHalted,
                    "mission halted after a critical task failed",
                ))?;
                if !skipped.is_empty() {
                    warn!(mission_id = %self.mission_id, skipped = skipped.len(), "Skipped undispatched tasks");
                }
                self.finish(MissionStatus::Failed, Some(err))
            }
            Halt::Stalled => self.finish(
                MissionStatus::Failed,
                Some(TaskError::new(
                    ErrorKind::Internal,
                    "no task is ready but the mission has not settled",
                )),
            ),
        }
    }

    fn finish(&self, status: MissionStatus, error: Option<TaskError>) -> ConvoyResult<()> {
        let snapshot = {
            let mut store = self.store.write();
            store.set_status(status, error.clone())?;
            store.scheduler().counts()
        };
        let cost_usd = self.store.read().mission().cost_usd;
        match status {
            MissionStatus::Completed => info!(
                mission_id = %self.mission_id,
                done = snapshot.done,
                failed = snapshot.failed,
                skipped = snapshot.skipped,
                cost_usd,
                "Mission completed"
            ),
            MissionStatus::Aborted => warn!(
                mission_id = %self.mission_id,
                done = snapshot.done,
                skipped = snapshot.skipped,
                "Mission aborted"
            ),
            _ => error!(
                mission_id = %self.mission_id,
                status = %status,
                error = ?error.map(|e| e.to_string()),
                "Mission failed"
            ),
        }
        Ok(())
    }

    async fn dispatch_loop(&self) -> ConvoyResult<Halt> {
        let mut halted: Option<TaskError> = None;
        loop {
            if let Some(err) = halted.take() {
                return Ok(Halt::CriticalFailure(err));
            }
            if self.cancel.is_cancelled() {
                return Ok(Halt::Aborted);
            }

            let batch = self.select_batch();
            if batch.is_empty() {
                let settled = self.store.read().scheduler().is_settled();
                return Ok(if settled { Halt::Settled } else { Halt::Stalled });
            }

            let dispatches = self.start_batch(&batch, &mut halted)?;
            if dispatches.is_empty() {
                continue;
            }

            let results = join_all(dispatches.iter().map(|d| self.execute(d))).await;
            for (dispatch, result) in dispatches.into_iter().zip(results) {
                let stopping = halted.is_some() || self.cancel.is_cancelled();
                if let Some(err) = self.settle(dispatch, result, stopping)? {
                    halted.get_or_insert(err);
                }
            }
        }
    }

    fn select_batch(&self) -> Vec<Uuid> {
        let store = self.store.read();
        let scheduler = store.scheduler();
        match self.options.mode {
            ExecutionMode::Parallel => scheduler
                .ready_tasks()
                .into_iter()
                .take(self.options.max_concurrency.max(1))
                .map(|t| t.id)
                .collect(),
            ExecutionMode::Sequential => {
                let ready: HashSet<Uuid> = scheduler.ready_tasks().iter().map(|t| t.id).collect();
                scheduler
                    .topological_order()
                    .into_iter()
                    .find(|t| ready.contains(&t.id))
                    .map(|t| vec![t.id])
                    .unwrap_or_default()
            }
        }
    }

    /// Queue the batch, then resolve and start each task unless the mission
    /// is stopping, in which case the rest go back to pending.
    fn start_batch(
        &self,
        batch: &[Uuid],
        halted: &mut Option<TaskError>,
    ) -> ConvoyResult<Vec<Dispatch>> {
        {
            let mut store = self.store.write();
            for id in batch {
                store.queue_task(*id)?;
            }
        }

        let mut dispatches = Vec::with_capacity(batch.len());
        for (i, id) in batch.iter().enumerate() {
            if halted.is_some() || self.cancel.is_cancelled() {
                let mut store = self.store.write();
                for rest in &batch[i..] {
                    store.requeue_task(*rest)?;
                }
                warn!(
                    mission_id = %self.mission_id,
                    requeued = batch.len() - i,
                    "Dispatch stopped, queued tasks returned to pending"
                );
                break;
            }

            let (task, inputs, mission_request, analysis) = {
                let store = self.store.read();
                let task = store.task(*id).cloned().ok_or(ConvoyError::UnknownTask(*id))?;
                let inputs: Vec<Artifact> = task
                    .dependencies
                    .iter()
                    .flat_map(|dep| store.artifacts_for(*dep))
                    .cloned()
                    .collect();
                let mission = store.mission();
                (task, inputs, mission.request.clone(), mission.analysis.clone())
            };

            let config = match self.pool.resolve(task.role, task.task_type) {
                Ok(config) => config,
                Err(e) => {
                    let err = TaskError::from(&e);
                    let skipped = self.store.write().fail_task(task.id, err.clone())?;
                    error!(
                        mission_id = %self.mission_id,
                        task_id = %task.id,
                        role = %task.role,
                        error = %err,
                        skipped = skipped.len(),
                        "Task could not be dispatched"
                    );
                    if task.critical {
                        halted.get_or_insert(critical_error(&task, &err));
                    }
                    continue;
                }
            };

            let attempt = self.store.write().start_task(task.id, &config.model.id)?;
            info!(
                mission_id = %self.mission_id,
                task_id = %task.id,
                role = %task.role,
                attempt,
                model = %config.model.id,
                "Task dispatched"
            );

            let task = {
                let store = self.store.read();
                store.task(*id).cloned().unwrap_or(task)
            };
            dispatches.push(Dispatch {
                delay: self.options.retry.delay_for(attempt.saturating_sub(1)),
                request: InvocationRequest {
                    mission_id: self.mission_id,
                    mission_request,
                    analysis,
                    task,
                    config,
                    inputs,
                    attempt,
                },
            });
        }
        Ok(dispatches)
    }

    async fn execute(&self, dispatch: &Dispatch) -> ConvoyResult<InvocationOutput> {
        if !dispatch.delay.is_zero() {
            tokio::time::sleep(dispatch.delay).await;
        }
        self.pool
            .invoke(dispatch.request.clone(), self.options.task_timeout)
            .await
    }

    /// Record one outcome. Returns the mission error when a critical task
    /// failed for good.
    fn settle(
        &self,
        dispatch: Dispatch,
        result: ConvoyResult<InvocationOutput>,
        stopping: bool,
    ) -> ConvoyResult<Option<TaskError>> {
        let InvocationRequest {
            task,
            config,
            attempt,
            ..
        } = dispatch.request;

        match result {
            Ok(output) => {
                let kind = output
                    .kind
                    .unwrap_or_else(|| task.task_type.default_artifact_kind());
                let cost_usd = config.model.cost(output.usage);
                let artifact =
                    Artifact::new(task.id, task.role, kind, task.title.clone(), output.content);
                self.store
                    .write()
                    .complete_task(task.id, artifact, output.usage, cost_usd)?;
                info!(
                    mission_id = %self.mission_id,
                    task_id = %task.id,
                    role = %task.role,
                    tokens = output.usage.total(),
                    cost_usd,
                    "Task completed"
                );
                Ok(None)
            }
            Err(e) => {
                let err = TaskError::from(&e);
                if e.is_retryable() && !stopping && self.options.retry.allows_retry(attempt) {
                    self.store.write().retry_task(task.id, err.clone())?;
                    warn!(
                        mission_id = %self.mission_id,
                        task_id = %task.id,
                        role = %task.role,
                        attempt,
                        error = %err,
                        "Task attempt failed, retrying"
                    );
                    return Ok(None);
                }

                let skipped = self.store.write().fail_task(task.id, err.clone())?;
                error!(
                    mission_id = %self.mission_id,
                    task_id = %task.id,
                    role = %task.role,
                    attempt,
                    error = %err,
                    skipped = skipped.len(),
                    "Task failed"
                );
                Ok(task.critical.then(|| critical_error(&task, &err)))
            }
        }
    }
}

/// Mark a mission `Failed` after a driver error. Returns whether the status
/// changed; a mission already in a terminal state keeps it.
fn record_internal_failure(store: &mut MissionStore, err: &ConvoyError) -> bool {
    if store.status().is_terminal() {
        return false;
    }
    match store.set_status(MissionStatus::Failed, Some(TaskError::from(err))) {
        Ok(()) => true,
        Err(status_err) => {
            warn!(
                mission_id = %store.id(),
                error = %status_err,
                "Could not record mission failure"
            );
            false
        }
    }
}

fn aborted() -> TaskError {
    TaskError::new(ErrorKind::Aborted, "mission aborted")
}

fn critical_error(task: &Task, err: &TaskError) -> TaskError {
    TaskError::new(
        err.kind,
        format!("critical task '{}' failed: {}", task.title, err.message),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = MissionOptions::default();
        assert_eq!(options.max_concurrency, 3);
        assert_eq!(options.mode, ExecutionMode::Parallel);
        assert!(options.critical_tasks.is_empty());
    }

    #[test]
    fn test_options_builder() {
        let options = MissionOptions::default()
            .with_max_concurrency(8)
            .with_retry(RetryPolicy::none())
            .with_task_timeout(Duration::from_secs(5))
            .with_critical_task(2)
            .sequential();
        assert_eq!(options.max_concurrency, 8);
        assert_eq!(options.retry.max_retries, 0);
        assert_eq!(options.task_timeout, Duration::from_secs(5));
        assert!(options.critical_tasks.contains(&2));
        assert_eq!(options.mode, ExecutionMode::Sequential);
    }

    #[test]
    fn test_internal_failure_recorded_once() {
        let mut store = MissionStore::create("x");
        store.set_status(MissionStatus::Planning, None).unwrap();
        let err = ConvoyError::Replay("store out of sync".into());
        assert!(record_internal_failure(&mut store, &err));
        assert_eq!(store.status(), MissionStatus::Failed);
        assert_eq!(store.mission().error.as_ref().unwrap().kind, ErrorKind::Internal);

        let events = store.events().len();
        assert!(!record_internal_failure(&mut store, &err));
        assert_eq!(store.events().len(), events);
    }

    #[test]
    fn test_critical_error_keeps_kind() {
        let task = Task::new(
            "Design",
            crate::types::TaskType::Plan,
            crate::types::AgentRole::Planner,
        );
        let err = critical_error(&task, &TaskError::new(ErrorKind::Timeout, "Timeout after 5ms"));
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.message.contains("Design"));
    }
}
