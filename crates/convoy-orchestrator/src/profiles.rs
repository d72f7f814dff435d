use crate::pool::AgentConfig;
use crate::types::{AgentRole, TaskType};
use convoy_agent::{ModelCatalog, ModelProvider, ModelSpec, DEFAULT_MODEL_ID};

/// Default bindings for the five roles, all on the default model.
pub fn default_profiles(catalog: &ModelCatalog) -> Vec<AgentConfig> {
    let model = catalog
        .get(DEFAULT_MODEL_ID)
        .cloned()
        .unwrap_or_else(|| ModelSpec::new(DEFAULT_MODEL_ID, DEFAULT_MODEL_ID, ModelProvider::Google));

    vec![
        profile(
            AgentRole::Orchestrator,
            "Orchestrator",
            "Analyzes requests and routes work",
            ORCHESTRATOR_PROMPT,
            &model,
            4096,
            0.3,
            vec![TaskType::Analyze, TaskType::Plan],
        ),
        profile(
            AgentRole::Planner,
            "Planner",
            "Designs architecture and interfaces",
            PLANNER_PROMPT,
            &model,
            8192,
            0.5,
            vec![TaskType::Analyze, TaskType::Plan],
        ),
        profile(
            AgentRole::Implementer,
            "Implementer",
            "Writes the code",
            IMPLEMENTER_PROMPT,
            &model,
            16384,
            0.2,
            vec![TaskType::Implement],
        ),
        profile(
            AgentRole::Tester,
            "Tester",
            "Writes tests and validates behaviour",
            TESTER_PROMPT,
            &model,
            8192,
            0.2,
            vec![TaskType::Test],
        ),
        profile(
            AgentRole::Reviewer,
            "Reviewer",
            "Reviews quality, security and performance",
            REVIEWER_PROMPT,
            &model,
            4096,
            0.3,
            vec![TaskType::Review, TaskType::Analyze],
        ),
    ]
}

#[allow(clippy::too_many_arguments)]
fn profile(
    role: AgentRole,
    name: &str,
    description: &str,
    prompt: &str,
    model: &ModelSpec,
    max_tokens: u32,
    temperature: f32,
    allowed_task_types: Vec<TaskType>,
) -> AgentConfig {
    AgentConfig {
        role,
        name: name.to_string(),
        description: description.to_string(),
        system_prompt: prompt.to_string(),
        model: model.clone(),
        max_tokens,
        temperature,
        allowed_task_types,
    }
}

const ORCHESTRATOR_PROMPT: &str = "\
You are the Orchestrator of a team of specialized agents. \
Analyze the user's request and break it into tasks for the planner, \
implementer, tester and reviewer.

Respond with a ```json block of the form:
{\"tasks\": [{\"tempId\": \"t1\", \"type\": \"plan\", \"agent\": \"planner\", \
\"title\": \"...\", \"description\": \"...\", \"dependencies\": [], \"priority\": \"high\"}]}

Task types: analyze, plan, implement, test, review. \
Priorities: critical, high, medium, low. \
Dependencies refer to the tempId of earlier tasks.";

const PLANNER_PROMPT: &str = "\
You are the Planner. You own architecture, data flow and interface design.

Include in your answer:
1. Architecture (folder layout, modules).
2. Data flow.
3. Interface definitions.
4. Implementation guidelines.";

const IMPLEMENTER_PROMPT: &str = "\
You are the Implementer. You write the code.

Rules:
1. Write code directly, without preamble.
2. The code must be complete and runnable.
3. Use precise types.
4. Handle errors explicitly.";

const TESTER_PROMPT: &str = "\
You are the Tester. You write test cases and validate quality.

Include in your answer:
1. Unit test code.
2. A list of test cases.
3. Edge case analysis.";

const REVIEWER_PROMPT: &str = "\
You are the Reviewer. You check code quality, security and performance.

Answer format:
### Findings
Passed: ...
Warnings: ...
Blockers: ...

### Verdict: APPROVE | REQUEST_CHANGES | REJECT";
