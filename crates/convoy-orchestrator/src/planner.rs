use crate::invoker::InvocationRequest;
use crate::pool::AgentPool;
use crate::types::{AgentRole, MissionAnalysis, Task, TaskPriority, TaskType};
use async_trait::async_trait;
use convoy_core::{ConvoyError, ConvoyResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// One planned task. Dependencies are indices into the same plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPlanItem {
    /// Short label, used as the artifact title.
    pub title: String,
    /// Full instruction. Falls back to the title when empty.
    #[serde(default)]
    pub description: String,
    /// Kind of work.
    #[serde(rename = "type", alias = "task_type")]
    pub task_type: TaskType,
    /// Role that executes the task.
    #[serde(alias = "agent")]
    pub role: AgentRole,
    /// Positions of earlier items in the same plan.
    #[serde(default)]
    pub depends_on: Vec<usize>,
    /// Dispatch tie-break.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Fails the mission when the task fails.
    #[serde(default)]
    pub critical: bool,
}

impl TaskPlanItem {
    /// Item with no dependencies and medium priority.
    pub fn new(title: impl Into<String>, task_type: TaskType, role: AgentRole) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            task_type,
            role,
            depends_on: Vec::new(),
            priority: TaskPriority::default(),
            critical: false,
        }
    }

    /// Sets the instruction.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the dependency indices.
    pub fn depends_on(mut self, indices: Vec<usize>) -> Self {
        self.depends_on = indices;
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the item critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// A planner's answer: the tasks to run and, when available, the analysis
/// every task gets as context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionPlan {
    /// Planner's reading of the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<MissionAnalysis>,
    /// Tasks in planning order.
    #[serde(default)]
    pub items: Vec<TaskPlanItem>,
}

impl MissionPlan {
    /// Plan without an analysis.
    pub fn new(items: Vec<TaskPlanItem>) -> Self {
        Self {
            analysis: None,
            items,
        }
    }

    /// Attaches an analysis.
    pub fn with_analysis(mut self, analysis: MissionAnalysis) -> Self {
        self.analysis = Some(analysis);
        self
    }
}

impl From<Vec<TaskPlanItem>> for MissionPlan {
    fn from(items: Vec<TaskPlanItem>) -> Self {
        Self::new(items)
    }
}

/// The planning capability: turns a request into a dependency-ordered plan.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Plan `request`. An empty item list completes the mission at once.
    async fn plan(&self, request: &str) -> ConvoyResult<MissionPlan>;
}

/// Always returns the same plan.
pub struct StaticPlanner {
    plan: MissionPlan,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanFile {
    Items(Vec<TaskPlanItem>),
    Plan(MissionPlan),
}

impl StaticPlanner {
    /// Planner returning `items` without an analysis.
    pub fn new(items: Vec<TaskPlanItem>) -> Self {
        Self {
            plan: MissionPlan::new(items),
        }
    }

    /// Attaches an analysis to the returned plan.
    pub fn with_analysis(mut self, analysis: MissionAnalysis) -> Self {
        self.plan.analysis = Some(analysis);
        self
    }

    /// Parse either a JSON array of plan items or an object with `analysis`
    /// and `items`.
    pub fn from_json(json: &str) -> ConvoyResult<Self> {
        let plan = match serde_json::from_str::<PlanFile>(json) {
            Ok(PlanFile::Items(items)) => MissionPlan::new(items),
            Ok(PlanFile::Plan(plan)) => plan,
            // Untagged errors say nothing useful; report the array parse.
            Err(_) => MissionPlan::new(serde_json::from_str(json)?),
        };
        Ok(Self { plan })
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _request: &str) -> ConvoyResult<MissionPlan> {
        Ok(self.plan.clone())
    }
}

/// Asks the orchestrator role for a plan through the pool.
///
/// Responses that cannot be parsed fall back to [`default_plan`].
pub struct InvokerPlanner {
    pool: Arc<AgentPool>,
    timeout: Duration,
}

impl InvokerPlanner {
    /// Planner bounded by `timeout` per planning call.
    pub fn new(pool: Arc<AgentPool>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl Planner for InvokerPlanner {
    async fn plan(&self, request: &str) -> ConvoyResult<MissionPlan> {
        let config = self
            .pool
            .resolve(AgentRole::Orchestrator, TaskType::Plan)
            .map_err(|e| ConvoyError::Planning(e.to_string()))?;
        let task = Task::new("Plan mission", TaskType::Plan, AgentRole::Orchestrator)
            .with_description(format!(
                "Analyze the following request and produce a task plan:\n\n{request}"
            ));
        let invocation = InvocationRequest {
            // Planning runs before any mission task table exists.
            mission_id: Uuid::nil(),
            mission_request: request.to_string(),
            task,
            config,
            analysis: None,
            inputs: Vec::new(),
            attempt: 1,
        };

        let output = self
            .pool
            .invoke(invocation, self.timeout)
            .await
            .map_err(|e| ConvoyError::Planning(e.to_string()))?;

        match parse_plan_response(&output.content) {
            Some(plan) => {
                info!(
                    tasks = plan.items.len(),
                    analysis = plan.analysis.is_some(),
                    "Plan parsed"
                );
                Ok(plan)
            }
            None => {
                warn!("Could not parse orchestrator plan, using default plan");
                Ok(MissionPlan::new(default_plan(request)).with_analysis(default_analysis()))
            }
        }
    }
}

#[derive(Deserialize)]
struct PlanDocument {
    #[serde(default)]
    analysis: Option<MissionAnalysis>,
    #[serde(default)]
    tasks: Vec<PlannedTask>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlannedTask {
    #[serde(default)]
    temp_id: Option<String>,
    #[serde(rename = "type")]
    task_type: TaskType,
    #[serde(alias = "role")]
    agent: AgentRole,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    priority: TaskPriority,
    #[serde(default)]
    critical: bool,
}

fn json_fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"```json\s*([\s\S]*?)\s*```").ok())
        .as_ref()
}

/// Extract a plan from a model response.
///
/// Reads the first fenced `json` block, or the whole response when there is
/// none. Dependencies name other tasks by `tempId`; unknown ids are dropped.
/// An `analysis` block without a summary gets a placeholder one.
pub fn parse_plan_response(response: &str) -> Option<MissionPlan> {
    let body = json_fence()
        .and_then(|re| re.captures(response))
        .and_then(|caps| caps.get(1))
        .map_or(response, |m| m.as_str());

    let doc: PlanDocument = serde_json::from_str(body.trim()).ok()?;

    let positions: HashMap<String, usize> = doc
        .tasks
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.temp_id.clone().map(|id| (id, i)))
        .collect();

    let analysis = doc.analysis.map(|mut analysis| {
        if analysis.summary.trim().is_empty() {
            analysis.summary = "Analysis complete".into();
        }
        analysis
    });

    let items = doc
        .tasks
        .into_iter()
        .map(|t| {
            let depends_on = t
                .dependencies
                .iter()
                .filter_map(|dep| {
                    let found = positions.get(dep).copied();
                    if found.is_none() {
                        warn!(task = %t.title, dependency = %dep, "Dropping unknown plan dependency");
                    }
                    found
                })
                .collect();
            TaskPlanItem {
                title: t.title,
                description: t.description,
                task_type: t.task_type,
                role: t.agent,
                depends_on,
                priority: t.priority,
                critical: t.critical,
            }
        })
        .collect();
    Some(MissionPlan { analysis, items })
}

/// Analysis that accompanies [`default_plan`] when the planner's answer
/// cannot be read.
pub fn default_analysis() -> MissionAnalysis {
    MissionAnalysis {
        summary: "Handle the request".into(),
        suggested_approach: "Step by step".into(),
        ..MissionAnalysis::default()
    }
}

/// Design, implement, test, review, each depending on the previous step.
pub fn default_plan(request: &str) -> Vec<TaskPlanItem> {
    vec![
        TaskPlanItem::new("Design", TaskType::Plan, AgentRole::Planner)
            .with_description(format!("Design the architecture and structure for: {request}"))
            .with_priority(TaskPriority::High),
        TaskPlanItem::new("Implement", TaskType::Implement, AgentRole::Implementer)
            .with_description("Implement the code following the design")
            .depends_on(vec![0])
            .with_priority(TaskPriority::High),
        TaskPlanItem::new("Test", TaskType::Test, AgentRole::Tester)
            .with_description("Write and run tests for the implementation")
            .depends_on(vec![1]),
        TaskPlanItem::new("Review", TaskType::Review, AgentRole::Reviewer)
            .with_description("Review the code and tests for quality, security and performance")
            .depends_on(vec![2]),
    ]
}

/// Turn plan items into tasks with fresh ids.
///
/// `critical` marks extra plan indices as mission-critical on top of each
/// item's own flag.
pub fn plan_to_tasks(items: &[TaskPlanItem], critical: &HashSet<usize>) -> ConvoyResult<Vec<Task>> {
    let mut tasks: Vec<Task> = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            Task::new(item.title.clone(), item.task_type, item.role)
                .with_description(item.description.clone())
                .with_priority(item.priority)
                .critical(item.critical || critical.contains(&i))
        })
        .collect();

    let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
    for (i, item) in items.iter().enumerate() {
        let mut deps = Vec::with_capacity(item.depends_on.len());
        for &dep in &item.depends_on {
            let id = ids.get(dep).copied().ok_or_else(|| {
                ConvoyError::InvalidPlan(format!(
                    "item {i} ({}) depends on item {dep}, but the plan has {} items",
                    item.title,
                    items.len()
                ))
            })?;
            deps.push(id);
        }
        tasks[i].dependencies = deps;
    }
    Ok(tasks)
}
