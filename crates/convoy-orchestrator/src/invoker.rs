use crate::pool::AgentConfig;
use crate::types::{Artifact, ArtifactKind, MissionAnalysis, Task};
use async_trait::async_trait;
use convoy_agent::TokenUsage;
use convoy_core::ConvoyResult;
use std::fmt::Write as _;
use uuid::Uuid;

/// Everything one agent call needs, captured when the dispatch starts.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Nil while planning, before the mission has tasks.
    pub mission_id: Uuid,
    /// The user's request text.
    pub mission_request: String,
    /// The planner's analysis, once recorded on the mission.
    pub analysis: Option<MissionAnalysis>,
    /// The task being dispatched, as it was when it started.
    pub task: Task,
    /// The role binding at dispatch time. Later model updates do not touch it.
    pub config: AgentConfig,
    /// Artifacts produced by the task's dependencies, in dependency order.
    pub inputs: Vec<Artifact>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl InvocationRequest {
    /// What the agent is asked to do.
    pub fn instruction(&self) -> &str {
        self.task.instruction()
    }

    /// Prompt context: the mission request, the planner's analysis, then
    /// the results of every dependency.
    pub fn render_context(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Mission");
        let _ = writeln!(out, "{}", self.mission_request);
        if let Some(analysis) = &self.analysis {
            let _ = writeln!(out, "\n## Analysis");
            let _ = writeln!(out, "{}", analysis.summary);
            write_list(&mut out, "Requirements", &analysis.requirements);
            write_list(&mut out, "Constraints", &analysis.constraints);
            write_list(&mut out, "Acceptance criteria", &analysis.acceptance_criteria);
            if !analysis.suggested_approach.is_empty() {
                let _ = writeln!(out, "\n### Approach\n{}", analysis.suggested_approach);
            }
        }
        if !self.inputs.is_empty() {
            let _ = writeln!(out, "\n## Previous results");
            for artifact in &self.inputs {
                let _ = writeln!(out, "\n### {} ({})", artifact.title, artifact.role);
                let _ = writeln!(out, "{}", artifact.content);
            }
        }
        out
    }
}

fn write_list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n### {heading}");
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
}

/// What an agent returned.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutput {
    /// Becomes the artifact content.
    pub content: String,
    /// Overrides the artifact kind implied by the task type.
    pub kind: Option<ArtifactKind>,
    /// Tokens billed for this call.
    pub usage: TokenUsage,
}

impl InvocationOutput {
    /// Plain content with no usage and the task type's artifact kind.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: None,
            usage: TokenUsage::default(),
        }
    }

    /// Override the artifact kind.
    pub fn with_kind(mut self, kind: ArtifactKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Report token usage.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// The agent invocation capability. Implementations talk to a model
/// provider; failures should be reported as `ConvoyError::Provider`.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run one agent call.
    async fn invoke(&self, request: InvocationRequest) -> ConvoyResult<InvocationOutput>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::profiles::default_profiles;
    use crate::types::{AgentRole, TaskType};
    use convoy_agent::default_catalog;

    #[test]
    fn test_render_context_includes_dependencies() {
        let config = default_profiles(&default_catalog())
            .into_iter()
            .find(|c| c.role == AgentRole::Tester)
            .unwrap();
        let design = Task::new("Design", TaskType::Plan, AgentRole::Planner);
        let inputs = vec![Artifact::new(
            design.id,
            AgentRole::Planner,
            ArtifactKind::Blueprint,
            "Design",
            "Use a layered architecture.",
        )];
        let request = InvocationRequest {
            mission_id: Uuid::new_v4(),
            mission_request: "Build a todo app".into(),
            analysis: None,
            task: Task::new("Write tests", TaskType::Test, AgentRole::Tester)
                .with_dependencies(vec![design.id]),
            config,
            inputs,
            attempt: 1,
        };

        let context = request.render_context();
        assert!(context.starts_with("## Mission\nBuild a todo app\n"));
        assert!(context.contains("## Previous results"));
        assert!(context.contains("### Design (planner)\nUse a layered architecture."));
        assert_eq!(request.instruction(), "Write tests");
    }

    #[test]
    fn test_render_context_without_dependencies() {
        let config = default_profiles(&default_catalog()).remove(0);
        let request = InvocationRequest {
            mission_id: Uuid::new_v4(),
            mission_request: "Summarize".into(),
            analysis: None,
            task: Task::new("Analyze", TaskType::Analyze, AgentRole::Orchestrator),
            config,
            inputs: Vec::new(),
            attempt: 1,
        };
        assert!(!request.render_context().contains("Previous results"));
        assert!(!request.render_context().contains("## Analysis"));
    }

    #[test]
    fn test_render_context_includes_analysis() {
        let config = default_profiles(&default_catalog()).remove(2);
        let design = Task::new("Design", TaskType::Plan, AgentRole::Planner);
        let analysis = MissionAnalysis::new("A todo manager for the terminal")
            .with_requirements(vec!["add items".into(), "list items".into()])
            .with_constraints(vec!["no network".into()]);
        let request = InvocationRequest {
            mission_id: Uuid::new_v4(),
            mission_request: "Build a todo app".into(),
            analysis: Some(analysis),
            task: Task::new("Build", TaskType::Implement, AgentRole::Implementer),
            config,
            inputs: vec![Artifact::new(
                design.id,
                AgentRole::Planner,
                ArtifactKind::Blueprint,
                "Design",
                "Two modules.",
            )],
            attempt: 1,
        };

        let context = request.render_context();
        assert!(context.contains(
            "## Analysis\nA todo manager for the terminal\n\n### Requirements\n- add items\n- list items\n"
        ));
        assert!(context.contains("### Constraints\n- no network\n"));
        assert!(!context.contains("Acceptance criteria"));
        let analysis_at = context.find("## Analysis").unwrap();
        assert!(context.find("## Mission").unwrap() < analysis_at);
        assert!(analysis_at < context.find("## Previous results").unwrap());
    }
}
