use crate::invoker::{AgentInvoker, InvocationOutput, InvocationRequest};
use crate::profiles::default_profiles;
use crate::types::{AgentRole, TaskType};
use convoy_agent::{default_catalog, ModelCatalog, ModelSpec, TokenUsage};
use convoy_core::{ConvoyError, ConvoyResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Binding of a role to a model, prompt and sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Role this config serves.
    pub role: AgentRole,
    /// Display name.
    pub name: String,
    /// What the role is for.
    pub description: String,
    /// Prompt sent ahead of every task.
    pub system_prompt: String,
    /// Bound model.
    pub model: ModelSpec,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Task types this role accepts. Empty accepts everything.
    #[serde(default)]
    pub allowed_task_types: Vec<TaskType>,
}

impl AgentConfig {
    /// True when `task_type` is in the accepted set.
    pub fn accepts(&self, task_type: TaskType) -> bool {
        self.allowed_task_types.is_empty() || self.allowed_task_types.contains(&task_type)
    }
}

#[derive(Debug, Clone, Default)]
struct Registry {
    roles: BTreeMap<AgentRole, AgentConfig>,
    catalog: ModelCatalog,
}

/// Registry of role bindings plus the invocation capability.
///
/// The registry is an immutable snapshot. Readers clone the `Arc` and never
/// block on writers; writers are serialized, build a modified copy and swap
/// it in. A dispatch keeps the binding it resolved, so a model update only
/// affects dispatches that start afterwards.
pub struct AgentPool {
    registry: RwLock<Arc<Registry>>,
    writer: Mutex<()>,
    invoker: Arc<dyn AgentInvoker>,
}

impl AgentPool {
    /// Registers `configs` after checking each model against `catalog`.
    pub fn new(
        catalog: ModelCatalog,
        configs: Vec<AgentConfig>,
        invoker: Arc<dyn AgentInvoker>,
    ) -> Self {
        let roles = configs.into_iter().map(|c| (c.role, c)).collect();
        Self {
            registry: RwLock::new(Arc::new(Registry { roles, catalog })),
            writer: Mutex::new(()),
            invoker,
        }
    }

    /// All five roles bound to the default catalog and prompts.
    pub fn with_defaults(invoker: Arc<dyn AgentInvoker>) -> Self {
        let catalog = default_catalog();
        let configs = default_profiles(&catalog);
        Self::new(catalog, configs, invoker)
    }

    fn snapshot(&self) -> Arc<Registry> {
        self.registry.read().clone()
    }

    fn update<T>(&self, f: impl FnOnce(&mut Registry) -> ConvoyResult<T>) -> ConvoyResult<T> {
        let _guard = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let out = f(&mut next)?;
        *self.registry.write() = Arc::new(next);
        Ok(out)
    }

    /// Copy of the config registered for `role`.
    pub fn get_config(&self, role: AgentRole) -> ConvoyResult<AgentConfig> {
        self.snapshot()
            .roles
            .get(&role)
            .cloned()
            .ok_or_else(|| ConvoyError::UnknownRole(role.to_string()))
    }

    /// Every registered binding, in role order.
    pub fn list_configs(&self) -> Vec<AgentConfig> {
        self.snapshot().roles.values().cloned().collect()
    }

    /// Copy of the model catalog.
    pub fn catalog(&self) -> ModelCatalog {
        self.snapshot().catalog.clone()
    }

    /// Add (or replace) a catalog entry.
    pub fn add_model(&self, model: ModelSpec) {
        let _ = self.update(|registry| {
            registry.catalog.insert(model);
            Ok(())
        });
    }

    /// Rebind a role to another catalog model.
    pub fn update_model(&self, role: AgentRole, model_id: &str) -> ConvoyResult<()> {
        self.update(|registry| {
            if !registry.roles.contains_key(&role) {
                return Err(ConvoyError::UnknownRole(role.to_string()));
            }
            let model = registry.catalog.require(model_id)?.clone();
            if let Some(config) = registry.roles.get_mut(&role) {
                config.model = model;
            }
            Ok(())
        })?;
        info!(role = %role, model = model_id, "Agent model updated");
        Ok(())
    }

    /// Modify a registered binding in place.
    pub fn update_config(
        &self,
        role: AgentRole,
        f: impl FnOnce(&mut AgentConfig),
    ) -> ConvoyResult<()> {
        self.update(|registry| {
            let config = registry
                .roles
                .get_mut(&role)
                .ok_or_else(|| ConvoyError::UnknownRole(role.to_string()))?;
            f(config);
            Ok(())
        })
    }

    /// Cost in USD of a call with the given token counts on the role's
    /// current model. Unregistered roles cost nothing.
    pub fn estimate_cost(&self, role: AgentRole, input_tokens: u64, output_tokens: u64) -> f64 {
        self.snapshot()
            .roles
            .get(&role)
            .map_or(0.0, |c| c.model.cost(TokenUsage::new(input_tokens, output_tokens)))
    }

    /// Add or replace a role binding. Returns the binding it replaced.
    pub fn register(&self, config: AgentConfig) -> Option<AgentConfig> {
        self.update(|registry| Ok(registry.roles.insert(config.role, config)))
            .ok()
            .flatten()
    }

    /// Removes the config for `role`, refusing while that agent is working.
    pub fn unregister(&self, role: AgentRole) -> ConvoyResult<AgentConfig> {
        self.update(|registry| {
            registry
                .roles
                .remove(&role)
                .ok_or_else(|| ConvoyError::UnknownRole(role.to_string()))
        })
    }

    /// Binding snapshot for one dispatch.
    pub fn resolve(&self, role: AgentRole, task_type: TaskType) -> ConvoyResult<AgentConfig> {
        let config = self.get_config(role)?;
        if !config.accepts(task_type) {
            return Err(ConvoyError::UnsupportedTaskType {
                role: role.to_string(),
                task_type: task_type.to_string(),
            });
        }
        Ok(config)
    }

    /// Run the invocation capability, bounded by `timeout`.
    pub async fn invoke(
        &self,
        request: InvocationRequest,
        timeout: Duration,
    ) -> ConvoyResult<InvocationOutput> {
        let task_id = request.task.id;
        let role = request.config.role;
        let attempt = request.attempt;
        let started = Instant::now();
        debug!(task_id = %task_id, role = %role, attempt, model = %request.config.model.id, "Invoking agent");

        match tokio::time::timeout(timeout, self.invoker.invoke(request)).await {
            Ok(Ok(output)) => {
                debug!(
                    task_id = %task_id,
                    role = %role,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    tokens = output.usage.total(),
                    "Agent returned"
                );
                Ok(output)
            }
            Ok(Err(e)) => {
                warn!(task_id = %task_id, role = %role, attempt, error = %e, "Agent call failed");
                Err(e)
            }
            Err(_) => {
                let after_ms = timeout.as_millis() as u64;
                warn!(task_id = %task_id, role = %role, attempt, after_ms, "Agent call timed out");
                Err(ConvoyError::Timeout { after_ms })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::Task;
    use async_trait::async_trait;
    use convoy_agent::{ModelProvider, DEFAULT_MODEL_ID};
    use convoy_core::ErrorKind;
    use uuid::Uuid;

    struct Echo {
        delay: Duration,
    }

    #[async_trait]
    impl AgentInvoker for Echo {
        async fn invoke(&self, request: InvocationRequest) -> ConvoyResult<InvocationOutput> {
            tokio::time::sleep(self.delay).await;
            Ok(InvocationOutput::text(request.instruction().to_string()))
        }
    }

    fn pool() -> AgentPool {
        AgentPool::with_defaults(Arc::new(Echo {
            delay: Duration::ZERO,
        }))
    }

    fn request(pool: &AgentPool, role: AgentRole, task_type: TaskType) -> InvocationRequest {
        InvocationRequest {
            mission_id: Uuid::new_v4(),
            mission_request: "demo".into(),
            analysis: None,
            task: Task::new("do it", task_type, role),
            config: pool.resolve(role, task_type).unwrap(),
            inputs: Vec::new(),
            attempt: 1,
        }
    }

    #[test]
    fn test_list_configs_role_order() {
        let roles: Vec<AgentRole> = pool().list_configs().iter().map(|c| c.role).collect();
        assert_eq!(roles, AgentRole::ALL.to_vec());
    }

    #[test]
    fn test_update_model() {
        let pool = pool();
        let before = pool.get_config(AgentRole::Implementer).unwrap();
        assert_eq!(before.model.id, DEFAULT_MODEL_ID);

        pool.update_model(AgentRole::Implementer, "deepseek-coder").unwrap();
        assert_eq!(
            pool.get_config(AgentRole::Implementer).unwrap().model.id,
            "deepseek-coder"
        );
        // Snapshots taken earlier are unaffected.
        assert_eq!(before.model.id, DEFAULT_MODEL_ID);
    }

    #[test]
    fn test_update_model_errors() {
        let pool = pool();
        assert!(matches!(
            pool.update_model(AgentRole::Tester, "gpt-9"),
            Err(ConvoyError::UnknownModel(_))
        ));
        pool.unregister(AgentRole::Tester).unwrap();
        assert!(matches!(
            pool.update_model(AgentRole::Tester, "deepseek-chat"),
            Err(ConvoyError::UnknownRole(_))
        ));
        assert!(matches!(
            pool.get_config(AgentRole::Tester),
            Err(ConvoyError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_estimate_cost() {
        let pool = pool();
        assert_eq!(pool.estimate_cost(AgentRole::Planner, 1_000_000, 1_000_000), 0.0);
        pool.update_model(AgentRole::Planner, "deepseek-chat").unwrap();
        let cost = pool.estimate_cost(AgentRole::Planner, 1_000_000, 1_000_000);
        assert!((cost - 1.37).abs() < 1e-9);
        pool.unregister(AgentRole::Planner).unwrap();
        assert_eq!(pool.estimate_cost(AgentRole::Planner, 10, 10), 0.0);
    }

    #[test]
    fn test_add_model_then_bind() {
        let pool = pool();
        pool.add_model(
            ModelSpec::new("claude-sonnet", "Claude Sonnet", ModelProvider::Anthropic)
                .with_prices(3.0, 15.0),
        );
        pool.update_model(AgentRole::Reviewer, "claude-sonnet").unwrap();
        assert_eq!(pool.catalog().len(), 6);
    }

    #[test]
    fn test_resolve_rejects_unsupported_task_type() {
        let pool = pool();
        let err = pool
            .resolve(AgentRole::Implementer, TaskType::Review)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedTaskType);
        assert!(pool.resolve(AgentRole::Implementer, TaskType::Implement).is_ok());
    }

    #[test]
    fn test_register_replaces_binding() {
        let pool = pool();
        let mut custom = pool.get_config(AgentRole::Tester).unwrap();
        custom.temperature = 0.9;
        custom.allowed_task_types.clear();
        let previous = pool.register(custom).unwrap();
        assert!((previous.temperature - 0.2).abs() < 1e-6);
        assert!(pool.resolve(AgentRole::Tester, TaskType::Review).is_ok());
    }

    #[tokio::test]
    async fn test_invoke_returns_output() {
        let pool = pool();
        let req = request(&pool, AgentRole::Planner, TaskType::Plan);
        let out = pool.invoke(req, Duration::from_secs(1)).await.unwrap();
        assert_eq!(out.content, "do it");
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let pool = AgentPool::with_defaults(Arc::new(Echo {
            delay: Duration::from_millis(200),
        }));
        let req = request(&pool, AgentRole::Planner, TaskType::Plan);
        let err = pool.invoke(req, Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, ConvoyError::Timeout { after_ms: 10 }));
        assert!(err.is_retryable());
    }
}
