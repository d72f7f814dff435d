use crate::types::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use convoy_core::{ConvoyError, ConvoyResult, TaskError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use uuid::Uuid;

/// Dependency-aware task table for one mission.
///
/// Tasks are kept in insertion order. Every ingested batch is validated as a
/// whole: ids are unique, every dependency resolves, and the graph stays
/// acyclic. A rejected batch leaves the table untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskScheduler {
    tasks: Vec<Task>,
    index: HashMap<Uuid, usize>,
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    /// Waiting on dependencies or a slot.
    pub pending: usize,
    /// Selected for dispatch.
    pub ready: usize,
    /// In flight.
    pub running: usize,
    /// Completed with an artifact.
    pub done: usize,
    /// Failed terminally.
    pub failed: usize,
    /// Never dispatched.
    pub skipped: usize,
}

impl TaskCounts {
    /// Sum over all statuses.
    pub fn total(&self) -> usize {
        self.pending + self.ready + self.running + self.done + self.failed + self.skipped
    }

    /// Fraction of tasks in a terminal state, in `[0, 1]`. An empty table is complete.
    pub fn progress(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        (self.done + self.failed + self.skipped) as f64 / total as f64
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

impl TaskScheduler {
    /// Empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of tasks, all or nothing.
    pub fn ingest(&mut self, batch: Vec<Task>) -> ConvoyResult<()> {
        let mut seen = HashSet::new();
        for task in &batch {
            if self.index.contains_key(&task.id) || !seen.insert(task.id) {
                return Err(ConvoyError::DuplicateTask(task.id));
            }
        }

        for task in &batch {
            for dep in &task.dependencies {
                if !seen.contains(dep) && !self.index.contains_key(dep) {
                    return Err(ConvoyError::DanglingDependency {
                        task: task.id,
                        missing: *dep,
                    });
                }
            }
        }

        // Existing tasks can only point at existing tasks, so any new cycle
        // runs through the batch.
        if let Some(cycle) = find_cycle(&batch) {
            return Err(ConvoyError::CyclicDependency { cycle });
        }

        for task in batch {
            self.index.insert(task.id, self.tasks.len());
            self.tasks.push(task);
        }
        Ok(())
    }

    /// Looks up a task by id.
    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.index.get(&id).map(|&i| &self.tasks[i])
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no task was ingested.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn done_set(&self) -> HashSet<Uuid> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .map(|t| t.id)
            .collect()
    }

    /// Pending tasks whose dependencies are all done, by priority then insertion order.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let done = self.done_set();
        let mut ready: Vec<&Task> = self.tasks.iter().filter(|t| t.is_ready(&done)).collect();
        ready.sort_by_key(|t| t.priority);
        ready
    }

    /// Every task, each after all of its dependencies.
    ///
    /// Among tasks whose dependencies have all been emitted, higher priority
    /// goes first, then insertion order.
    pub fn topological_order(&self) -> Vec<&Task> {
        let mut indegree: Vec<usize> = self.tasks.iter().map(|t| t.dependencies.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.tasks.len()];
        for (i, task) in self.tasks.iter().enumerate() {
            for dep in &task.dependencies {
                if let Some(&d) = self.index.get(dep) {
                    dependents[d].push(i);
                }
            }
        }

        let mut frontier: BTreeSet<_> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(i, _)| indegree[*i] == 0)
            .map(|(i, t)| (t.priority, i))
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(next) = frontier.pop_first() {
            let (_, i) = next;
            order.push(&self.tasks[i]);
            for &child in &dependents[i] {
                indegree[child] -= 1;
                if indegree[child] == 0 {
                    frontier.insert((self.tasks[child].priority, child));
                }
            }
        }
        order
    }

    fn check(&self, id: Uuid, to: TaskStatus) -> ConvoyResult<usize> {
        let idx = *self.index.get(&id).ok_or(ConvoyError::UnknownTask(id))?;
        let from = self.tasks[idx].status;
        if !from.can_transition_to(to) {
            return Err(ConvoyError::InvalidTransition {
                entity: id,
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(idx)
    }

    /// Move a task to `to`, stamping lifecycle timestamps with `at`.
    ///
    /// Entering `Running` counts a new attempt.
    pub fn transition_at(
        &mut self,
        id: Uuid,
        to: TaskStatus,
        at: DateTime<Utc>,
    ) -> ConvoyResult<()> {
        let idx = self.check(id, to)?;
        let task = &mut self.tasks[idx];
        task.status = to;
        match to {
            TaskStatus::Running => {
                task.attempts += 1;
                task.started_at = Some(at);
            }
            s if s.is_terminal() => task.completed_at = Some(at),
            _ => {}
        }
        Ok(())
    }

    /// Pending to ready.
    pub fn mark_ready(&mut self, id: Uuid) -> ConvoyResult<()> {
        self.transition_at(id, TaskStatus::Ready, Utc::now())
    }

    /// Ready to running.
    pub fn mark_running(&mut self, id: Uuid) -> ConvoyResult<()> {
        self.transition_at(id, TaskStatus::Running, Utc::now())
    }

    /// Running to done.
    pub fn mark_done(&mut self, id: Uuid) -> ConvoyResult<()> {
        self.transition_at(id, TaskStatus::Done, Utc::now())
    }

    /// Return a ready or running task to pending, e.g. for a retry.
    pub fn requeue(&mut self, id: Uuid) -> ConvoyResult<()> {
        self.transition_at(id, TaskStatus::Pending, Utc::now())
    }

    /// Fail a task and skip everything downstream of it. Returns the skipped ids.
    pub fn mark_failed(&mut self, id: Uuid, error: TaskError) -> ConvoyResult<Vec<Uuid>> {
        let skipped = self.cascade_targets(id);
        self.fail_at(id, error, &skipped, Utc::now())?;
        Ok(skipped)
    }

    /// Non-terminal transitive dependents of `failed`, in insertion order.
    pub fn cascade_targets(&self, failed: Uuid) -> Vec<Uuid> {
        let mut doomed = HashSet::from([failed]);
        loop {
            let before = doomed.len();
            for task in &self.tasks {
                if task.dependencies.iter().any(|d| doomed.contains(d)) {
                    doomed.insert(task.id);
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        self.tasks
            .iter()
            .filter(|t| t.id != failed && doomed.contains(&t.id))
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Ready))
            .map(|t| t.id)
            .collect()
    }

    /// Record a failure together with its precomputed cascade.
    ///
    /// Every transition is checked before any is applied.
    pub fn fail_at(
        &mut self,
        id: Uuid,
        error: TaskError,
        skipped: &[Uuid],
        at: DateTime<Utc>,
    ) -> ConvoyResult<()> {
        self.check(id, TaskStatus::Failed)?;
        for s in skipped {
            self.check(*s, TaskStatus::Skipped)?;
        }

        self.transition_at(id, TaskStatus::Failed, at)?;
        self.set_error(id, error);
        for s in skipped {
            self.transition_at(*s, TaskStatus::Skipped, at)?;
            self.set_error(*s, TaskError::dependency_failed(id));
        }
        Ok(())
    }

    /// Skip a single task that never started.
    pub fn skip_at(&mut self, id: Uuid, error: TaskError, at: DateTime<Utc>) -> ConvoyResult<()> {
        self.transition_at(id, TaskStatus::Skipped, at)?;
        self.set_error(id, error);
        Ok(())
    }

    pub(crate) fn set_error(&mut self, id: Uuid, error: TaskError) {
        if let Some(&i) = self.index.get(&id) {
            self.tasks[i].error = Some(error);
        }
    }

    pub(crate) fn set_artifact(&mut self, id: Uuid, artifact: Option<Uuid>) {
        if let Some(&i) = self.index.get(&id) {
            self.tasks[i].artifact = artifact;
        }
    }

    /// Tasks that have not been dispatched and are not terminal.
    pub fn unstarted(&self) -> Vec<Uuid> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Ready))
            .map(|t| t.id)
            .collect()
    }

    /// Every task is done, failed or skipped.
    pub fn is_settled(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Tallies tasks by status.
    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Ready => counts.ready += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Done => counts.done += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Depth of each task: 0 without dependencies, else one more than its deepest dependency.
    pub fn levels(&self) -> HashMap<Uuid, usize> {
        let mut levels: HashMap<Uuid, usize> = HashMap::new();
        for task in self.topological_order() {
            let level = task
                .dependencies
                .iter()
                .filter_map(|d| levels.get(d))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            levels.insert(task.id, level);
        }
        levels
    }

    /// Longest dependency chain, from a root task to a sink.
    pub fn critical_path(&self) -> Vec<Uuid> {
        let mut best: HashMap<Uuid, (usize, Option<Uuid>)> = HashMap::new();
        let mut tail: Option<(usize, Uuid)> = None;
        for task in self.topological_order() {
            let (len, prev) = task
                .dependencies
                .iter()
                .filter_map(|d| best.get(d).map(|(l, _)| (*l, *d)))
                .fold((0, None), |acc, (l, d)| if l > acc.0 { (l, Some(d)) } else { acc });
            best.insert(task.id, (len + 1, prev));
            if tail.map_or(true, |(l, _)| len + 1 > l) {
                tail = Some((len + 1, task.id));
            }
        }

        let mut path = Vec::new();
        let mut cursor = tail.map(|(_, id)| id);
        while let Some(id) = cursor {
            path.push(id);
            cursor = best.get(&id).and_then(|(_, prev)| *prev);
        }
        path.reverse();
        path
    }

    /// Width of the widest level, at least 1.
    pub fn max_parallelism(&self) -> usize {
        let mut widths: HashMap<usize, usize> = HashMap::new();
        for level in self.levels().into_values() {
            *widths.entry(level).or_default() += 1;
        }
        widths.into_values().max().unwrap_or(0).max(1)
    }

    /// Human-readable dump of the graph, one level per block.
    pub fn visualize(&self) -> String {
        let levels = self.levels();
        let depth = levels.values().copied().max().map_or(0, |m| m + 1);
        let mut out = String::new();
        for level in 0..depth {
            let _ = writeln!(out, "Level {level}:");
            for task in self.tasks.iter().filter(|t| levels.get(&t.id) == Some(&level)) {
                let _ = write!(
                    out,
                    "  [{}] {} ({}, {})",
                    task.status, task.title, task.role, task.task_type
                );
                if !task.dependencies.is_empty() {
                    let deps: Vec<&str> = task
                        .dependencies
                        .iter()
                        .filter_map(|d| self.get(*d))
                        .map(|d| d.title.as_str())
                        .collect();
                    let _ = write!(out, " <- {}", deps.join(", "));
                }
                out.push('\n');
            }
        }
        out
    }
}

/// Depth-first colouring over the batch. Returns the first cycle found as a
/// path that starts and ends on the same task.
fn find_cycle(batch: &[Task]) -> Option<Vec<Uuid>> {
    let edges: HashMap<Uuid, &[Uuid]> = batch
        .iter()
        .map(|t| (t.id, t.dependencies.as_slice()))
        .collect();
    let mut marks = HashMap::new();
    let mut path = Vec::new();
    for task in batch {
        if !marks.contains_key(&task.id) {
            if let Some(cycle) = visit(task.id, &edges, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    id: Uuid,
    edges: &HashMap<Uuid, &[Uuid]>,
    marks: &mut HashMap<Uuid, Mark>,
    path: &mut Vec<Uuid>,
) -> Option<Vec<Uuid>> {
    marks.insert(id, Mark::Visiting);
    path.push(id);
    for &dep in edges.get(&id).copied().unwrap_or_default() {
        match marks.get(&dep) {
            Some(Mark::Visiting) => {
                let start = path.iter().position(|p| *p == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
            Some(Mark::Visited) => {}
            None => {
                if let Some(cycle) = visit(dep, edges, marks, path) {
                    return Some(cycle);
                }
            }
        }
    }
    path.pop();
    marks.insert(id, Mark::Visited);
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{AgentRole, TaskPriority, TaskType};
    use convoy_core::ErrorKind;

    fn task(title: &str) -> Task {
        Task::new(title, TaskType::Implement, AgentRole::Implementer)
    }

    fn diamond() -> (TaskScheduler, [Uuid; 4]) {
        let a = task("A");
        let b = task("B").with_dependencies(vec![a.id]);
        let c = task("C").with_dependencies(vec![a.id]);
        let d = task("D").with_dependencies(vec![b.id, c.id]);
        let ids = [a.id, b.id, c.id, d.id];
        let mut scheduler = TaskScheduler::new();
        scheduler.ingest(vec![a, b, c, d]).unwrap();
        (scheduler, ids)
    }

    /// Pending tasks whose dependencies are all done, in insertion order,
    /// then stably sorted by priority.
    fn ready_by_rescan(scheduler: &TaskScheduler) -> Vec<Uuid> {
        let done: HashSet<Uuid> = scheduler
            .tasks()
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .map(|t| t.id)
            .collect();
        let mut ready: Vec<&Task> = scheduler
            .tasks()
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Pending && t.dependencies.iter().all(|d| done.contains(d))
            })
            .collect();
        ready.sort_by_key(|t| t.priority);
        ready.into_iter().map(|t| t.id).collect()
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Ready,
        Run,
        Done,
        Fail,
        Requeue,
    }

    #[test]
    fn test_ready_tasks_match_rescan_after_every_transition() {
        // A -> {B, C} -> D, E -> F -> G (G also needs A), H -> I.
        let a = task("A");
        let b = task("B").with_dependencies(vec![a.id]);
        let c = task("C").with_dependencies(vec![a.id]);
        let d = task("D").with_dependencies(vec![b.id, c.id]);
        let e = task("E").with_priority(TaskPriority::High);
        let f = task("F").with_dependencies(vec![e.id]);
        let g = task("G").with_dependencies(vec![f.id, a.id]);
        let h = task("H").with_priority(TaskPriority::Low);
        let i = task("I").with_dependencies(vec![h.id]);
        let ids: Vec<Uuid> = [&a, &b, &c, &d, &e, &f, &g, &h, &i].iter().map(|t| t.id).collect();
        let mut scheduler = TaskScheduler::new();
        scheduler.ingest(vec![a, b, c, d, e, f, g, h, i]).unwrap();

        let steps = [
            (Step::Ready, 0),
            (Step::Run, 0),
            (Step::Done, 0),
            (Step::Ready, 4),
            (Step::Requeue, 4),
            (Step::Ready, 4),
            (Step::Run, 4),
            (Step::Fail, 4),
            (Step::Ready, 1),
            (Step::Ready, 2),
            (Step::Run, 1),
            (Step::Done, 1),
            (Step::Run, 2),
            (Step::Requeue, 2),
            (Step::Ready, 2),
            (Step::Run, 2),
            (Step::Done, 2),
            (Step::Ready, 7),
            (Step::Run, 7),
            (Step::Fail, 7),
            (Step::Ready, 3),
            (Step::Run, 3),
            (Step::Done, 3),
        ];

        assert_eq!(
            scheduler.ready_tasks().iter().map(|t| t.id).collect::<Vec<_>>(),
            ready_by_rescan(&scheduler)
        );
        for (n, (step, index)) in steps.iter().enumerate() {
            let id = ids[*index];
            match step {
                Step::Ready => scheduler.mark_ready(id).unwrap(),
                Step::Run => scheduler.mark_running(id).unwrap(),
                Step::Done => scheduler.mark_done(id).unwrap(),
                Step::Requeue => scheduler.requeue(id).unwrap(),
                Step::Fail => {
                    scheduler
                        .mark_failed(id, TaskError::new(ErrorKind::Provider, "boom"))
                        .unwrap();
                }
            }
            let ready: Vec<Uuid> = scheduler.ready_tasks().iter().map(|t| t.id).collect();
            assert_eq!(ready, ready_by_rescan(&scheduler), "after step {n}: {step:?} {index}");
            assert!(ready
                .iter()
                .all(|id| scheduler.get(*id).unwrap().status == TaskStatus::Pending));
        }

        assert!(scheduler.ready_tasks().is_empty());
        assert!(scheduler.is_settled());
        let counts = scheduler.counts();
        assert_eq!((counts.done, counts.failed, counts.skipped), (4, 2, 3));
    }

    #[test]
    fn test_ingest_and_ready() {
        let (scheduler, [a, ..]) = diamond();
        assert_eq!(scheduler.len(), 4);
        let ready: Vec<Uuid> = scheduler.ready_tasks().iter().map(|t| t.id).collect();
        assert_eq!(ready, vec![a]);
    }

    #[test]
    fn test_dependency_resolution() {
        let (mut scheduler, [a, b, c, d]) = diamond();
        scheduler.mark_running(a).unwrap();
        assert!(scheduler.ready_tasks().is_empty());
        scheduler.mark_done(a).unwrap();

        let ready: Vec<Uuid> = scheduler.ready_tasks().iter().map(|t| t.id).collect();
        assert_eq!(ready, vec![b, c]);

        for id in [b, c] {
            scheduler.mark_running(id).unwrap();
            scheduler.mark_done(id).unwrap();
        }
        assert_eq!(scheduler.ready_tasks()[0].id, d);
    }

    #[test]
    fn test_ready_sorted_by_priority() {
        let low = task("low").with_priority(TaskPriority::Low);
        let high = task("high").with_priority(TaskPriority::High);
        let medium = task("medium");
        let ids = (low.id, high.id, medium.id);
        let mut scheduler = TaskScheduler::new();
        scheduler.ingest(vec![low, high, medium]).unwrap();

        let ready: Vec<Uuid> = scheduler.ready_tasks().iter().map(|t| t.id).collect();
        assert_eq!(ready, vec![ids.1, ids.2, ids.0]);
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let (scheduler, [a, b, c, d]) = diamond();
        let order: Vec<Uuid> = scheduler.topological_order().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![a, b, c, d]);
    }

    #[test]
    fn test_topological_order_tie_break() {
        let a = task("A");
        let b = task("B").with_priority(TaskPriority::Critical);
        let c = task("C").with_dependencies(vec![a.id]).with_priority(TaskPriority::Critical);
        let ids = (a.id, b.id, c.id);
        let mut scheduler = TaskScheduler::new();
        scheduler.ingest(vec![a, b, c]).unwrap();

        let order: Vec<Uuid> = scheduler.topological_order().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![ids.1, ids.0, ids.2]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let a = task("A");
        let dup = a.clone();
        let mut scheduler = TaskScheduler::new();
        let err = scheduler.ingest(vec![a, dup]).unwrap_err();
        assert!(matches!(err, ConvoyError::DuplicateTask(_)));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_duplicate_of_existing_rejected() {
        let a = task("A");
        let again = a.clone();
        let mut scheduler = TaskScheduler::new();
        scheduler.ingest(vec![a]).unwrap();
        assert!(matches!(
            scheduler.ingest(vec![again]),
            Err(ConvoyError::DuplicateTask(_))
        ));
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let ghost = Uuid::new_v4();
        let a = task("A");
        let b = task("B").with_dependencies(vec![ghost]);
        let b_id = b.id;
        let mut scheduler = TaskScheduler::new();
        let err = scheduler.ingest(vec![a, b]).unwrap_err();
        match err {
            ConvoyError::DanglingDependency { task, missing } => {
                assert_eq!(task, b_id);
                assert_eq!(missing, ghost);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_cycle_rejected_with_path() {
        let mut a = task("A");
        let mut b = task("B");
        let c = task("C");
        a.dependencies = vec![b.id];
        b.dependencies = vec![a.id];
        let (a_id, b_id) = (a.id, b.id);
        let mut scheduler = TaskScheduler::new();
        let err = scheduler.ingest(vec![c, a, b]).unwrap_err();
        match err {
            ConvoyError::CyclicDependency { cycle } => {
                assert_eq!(cycle, vec![a_id, b_id, a_id]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let mut a = task("A");
        a.dependencies = vec![a.id];
        let mut scheduler = TaskScheduler::new();
        assert!(matches!(
            scheduler.ingest(vec![a]),
            Err(ConvoyError::CyclicDependency { cycle }) if cycle.len() == 2
        ));
    }

    #[test]
    fn test_later_batch_may_depend_on_earlier() {
        let (mut scheduler, [_, _, _, d]) = diamond();
        let e = task("E").with_dependencies(vec![d]);
        scheduler.ingest(vec![e]).unwrap();
        assert_eq!(scheduler.len(), 5);
    }

    #[test]
    fn test_failure_cascades_transitively() {
        let (mut scheduler, [a, b, c, d]) = diamond();
        scheduler.mark_running(a).unwrap();
        let err = TaskError::new(ErrorKind::Provider, "boom");
        let skipped = scheduler.mark_failed(a, err.clone()).unwrap();

        assert_eq!(skipped, vec![b, c, d]);
        assert_eq!(scheduler.get(a).unwrap().status, TaskStatus::Failed);
        assert_eq!(scheduler.get(a).unwrap().error, Some(err));
        for id in [b, c, d] {
            let t = scheduler.get(id).unwrap();
            assert_eq!(t.status, TaskStatus::Skipped);
            assert_eq!(t.error.as_ref().unwrap().kind, ErrorKind::DependencyFailed);
        }
        assert!(scheduler.is_settled());
    }

    #[test]
    fn test_failure_spares_independent_branch() {
        let (mut scheduler, [a, b, c, d]) = diamond();
        scheduler.mark_running(a).unwrap();
        scheduler.mark_done(a).unwrap();
        scheduler.mark_running(b).unwrap();
        scheduler.mark_running(c).unwrap();
        scheduler.mark_done(c).unwrap();

        let skipped = scheduler
            .mark_failed(b, TaskError::new(ErrorKind::Timeout, "slow"))
            .unwrap();
        assert_eq!(skipped, vec![d]);
        assert_eq!(scheduler.get(c).unwrap().status, TaskStatus::Done);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let (mut scheduler, [a, b, ..]) = diamond();
        assert!(matches!(
            scheduler.mark_done(a),
            Err(ConvoyError::InvalidTransition { .. })
        ));
        scheduler.mark_running(a).unwrap();
        scheduler.mark_done(a).unwrap();
        assert!(scheduler.requeue(a).is_err());
        assert!(matches!(
            scheduler.mark_ready(Uuid::new_v4()),
            Err(ConvoyError::UnknownTask(_))
        ));
        assert_eq!(scheduler.get(b).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_requeue_counts_attempts() {
        let (mut scheduler, [a, ..]) = diamond();
        scheduler.mark_ready(a).unwrap();
        scheduler.mark_running(a).unwrap();
        scheduler.requeue(a).unwrap();
        scheduler.mark_running(a).unwrap();
        assert_eq!(scheduler.get(a).unwrap().attempts, 2);
        assert!(scheduler.get(a).unwrap().started_at.is_some());
    }

    #[test]
    fn test_levels_and_parallelism() {
        let (scheduler, [a, b, c, d]) = diamond();
        let levels = scheduler.levels();
        assert_eq!(levels[&a], 0);
        assert_eq!(levels[&b], 1);
        assert_eq!(levels[&c], 1);
        assert_eq!(levels[&d], 2);
        assert_eq!(scheduler.max_parallelism(), 2);
        assert_eq!(TaskScheduler::new().max_parallelism(), 1);
    }

    #[test]
    fn test_critical_path() {
        let (mut scheduler, [a, b, _, d]) = diamond();
        let e = task("E").with_dependencies(vec![d]);
        let e_id = e.id;
        scheduler.ingest(vec![e]).unwrap();
        assert_eq!(scheduler.critical_path(), vec![a, b, d, e_id]);
        assert!(TaskScheduler::new().critical_path().is_empty());
    }

    #[test]
    fn test_counts_and_progress() {
        let (mut scheduler, [a, ..]) = diamond();
        scheduler.mark_running(a).unwrap();
        scheduler.mark_done(a).unwrap();
        let counts = scheduler.counts();
        assert_eq!(counts.done, 1);
        assert_eq!(counts.pending, 3);
        assert!((counts.progress() - 0.25).abs() < 1e-9);
        assert!(!scheduler.is_settled());
        assert_eq!(scheduler.unstarted().len(), 3);
    }

    #[test]
    fn test_visualize_lists_levels() {
        let (scheduler, _) = diamond();
        let out = scheduler.visualize();
        assert!(out.contains("Level 0:"));
        assert!(out.contains("Level 2:"));
        assert!(out.contains("[pending] D (implementer, implement) <- B, C"));
    }
}
