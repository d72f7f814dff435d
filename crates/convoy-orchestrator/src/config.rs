use crate::engine::{ExecutionMode, MissionOptions};
use crate::invoker::AgentInvoker;
use crate::pool::AgentPool;
use crate::profiles::default_profiles;
use crate::types::AgentRole;
use convoy_agent::{default_catalog, ModelCatalog, ModelSpec, RetryPolicy};
use convoy_core::{ConvoyError, ConvoyResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Top-level `convoy.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConvoyConfig {
    /// Defaults applied to every mission.
    #[serde(default)]
    pub mission: MissionDefaults,
    /// Extra catalog entries. An id already in the catalog replaces it.
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    /// Per-role overrides keyed by role name.
    #[serde(default)]
    pub roles: BTreeMap<String, RoleOverride>,
}

/// The `[mission]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct MissionDefaults {
    /// Upper bound on concurrently running tasks.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Retries after the first attempt of a task.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Deadline for one agent invocation.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Dispatch one task at a time.
    #[serde(default)]
    pub sequential: bool,
    /// Delay between retries.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for MissionDefaults {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            task_timeout_secs: default_task_timeout_secs(),
            sequential: false,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Retry backoff bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    /// Upper bound on any single delay.
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
        }
    }
}

/// Per-role tweaks layered on the built-in agent config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleOverride {
    /// Catalog id of the model to bind.
    pub model: Option<String>,
    /// Sampling temperature within `0.0..=2.0`.
    pub temperature: Option<f32>,
    /// Completion token limit.
    pub max_tokens: Option<u32>,
    /// Replacement system prompt.
    pub system_prompt: Option<String>,
}

fn default_max_concurrency() -> usize {
    3
}
fn default_max_retries() -> u32 {
    2
}
fn default_task_timeout_secs() -> u64 {
    120
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}

impl ConvoyConfig {
    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConvoyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConvoyError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> ConvoyResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConvoyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero limits and inverted backoff bounds, and checks role models against the catalog.
    pub fn validate(&self) -> ConvoyResult<()> {
        if self.mission.max_concurrency == 0 {
            return Err(ConvoyError::Config(
                "mission.max_concurrency must be at least 1".into(),
            ));
        }
        if self.mission.task_timeout_secs == 0 {
            return Err(ConvoyError::Config(
                "mission.task_timeout_secs must be positive".into(),
            ));
        }
        if self.mission.backoff.base_ms > self.mission.backoff.max_ms {
            return Err(ConvoyError::Config(
                "mission.backoff.base_ms exceeds max_ms".into(),
            ));
        }
        for (name, over) in &self.roles {
            name.parse::<AgentRole>()
                .map_err(|_| ConvoyError::Config(format!("unknown role '{name}' in [roles]")))?;
            if let Some(t) = over.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(ConvoyError::Config(format!(
                        "roles.{name}.temperature must be within 0.0..=2.0"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Default catalog plus `[[models]]`.
    pub fn catalog(&self) -> ModelCatalog {
        let mut catalog = default_catalog();
        for model in &self.models {
            catalog.insert(model.clone());
        }
        catalog
    }

    /// A pool with the default profiles and this file's overrides applied.
    pub fn build_pool(&self, invoker: Arc<dyn AgentInvoker>) -> ConvoyResult<AgentPool> {
        let catalog = self.catalog();
        let mut configs = default_profiles(&catalog);
        for (name, over) in &self.roles {
            let role: AgentRole = name
                .parse()
                .map_err(|_| ConvoyError::Config(format!("unknown role '{name}' in [roles]")))?;
            let Some(config) = configs.iter_mut().find(|c| c.role == role) else {
                continue;
            };
            if let Some(model_id) = &over.model {
                config.model = catalog
                    .require(model_id)
                    .map_err(|e| ConvoyError::Config(format!("roles.{name}.model: {e}")))?
                    .clone();
            }
            if let Some(t) = over.temperature {
                config.temperature = t;
            }
            if let Some(max) = over.max_tokens {
                config.max_tokens = max;
            }
            if let Some(prompt) = &over.system_prompt {
                config.system_prompt = prompt.clone();
            }
        }
        Ok(AgentPool::new(catalog, configs, invoker))
    }

    /// Mission options derived from the `[mission]` table.
    pub fn mission_options(&self) -> MissionOptions {
        let m = &self.mission;
        MissionOptions {
            max_concurrency: m.max_concurrency,
            retry: RetryPolicy {
                max_retries: m.max_retries,
                backoff_base_ms: m.backoff.base_ms,
                backoff_max_ms: m.backoff.max_ms,
            },
            task_timeout: Duration::from_secs(m.task_timeout_secs),
            mode: if m.sequential {
                ExecutionMode::Sequential
            } else {
                ExecutionMode::Parallel
            },
            ..MissionOptions::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::invoker::{InvocationOutput, InvocationRequest};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl AgentInvoker for Noop {
        async fn invoke(&self, _request: InvocationRequest) -> ConvoyResult<InvocationOutput> {
            Ok(InvocationOutput::text(""))
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConvoyConfig::from_toml_str("").unwrap();
        let options = config.mission_options();
        assert_eq!(options.max_concurrency, 3);
        assert_eq!(options.retry.max_retries, 2);
        assert_eq!(options.task_timeout, Duration::from_secs(120));
        assert_eq!(options.mode, ExecutionMode::Parallel);
    }

    #[test]
    fn test_full_config() {
        let config = ConvoyConfig::from_toml_str(
            r#"
            [mission]
            max_concurrency = 5
            max_retries = 1
            task_timeout_secs = 30
            sequential = true

            [mission.backoff]
            base_ms = 100
            max_ms = 1000

            [[models]]
            id = "claude-sonnet"
            name = "Claude Sonnet"
            provider = "anthropic"
            input_price = 3.0
            output_price = 15.0

            [roles.implementer]
            model = "claude-sonnet"
            temperature = 0.1
            max_tokens = 32000
            "#,
        )
        .unwrap();

        let options = config.mission_options();
        assert_eq!(options.max_concurrency, 5);
        assert_eq!(options.mode, ExecutionMode::Sequential);
        assert_eq!(options.retry.backoff_base_ms, 100);

        let pool = config.build_pool(Arc::new(Noop)).unwrap();
        let implementer = pool.get_config(AgentRole::Implementer).unwrap();
        assert_eq!(implementer.model.id, "claude-sonnet");
        assert_eq!(implementer.max_tokens, 32000);
        assert!((implementer.temperature - 0.1).abs() < 1e-6);
        assert_eq!(pool.catalog().len(), 6);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for text in [
            "[mission]\nmax_concurrency = 0",
            "[mission]\ntask_timeout_secs = 0",
            "[roles.auditor]\nmodel = \"deepseek-chat\"",
            "[roles.tester]\ntemperature = 7.5",
            "[mission.backoff]\nbase_ms = 5000\nmax_ms = 10",
        ] {
            let err = ConvoyConfig::from_toml_str(text).unwrap_err();
            assert!(matches!(err, ConvoyError::Config(_)), "{text}: {err}");
        }
    }

    #[test]
    fn test_unknown_model_override_rejected() {
        let config = ConvoyConfig::from_toml_str("[roles.planner]\nmodel = \"gpt-9\"").unwrap();
        let err = config.build_pool(Arc::new(Noop)).err().unwrap();
        assert!(err.to_string().contains("gpt-9"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convoy.toml");
        std::fs::write(&path, "[mission]\nmax_concurrency = 2\n").unwrap();
        let config = ConvoyConfig::load(&path).unwrap();
        assert_eq!(config.mission.max_concurrency, 2);
        assert!(ConvoyConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
