//! Model bindings for Convoy agents: providers, the model catalog with
//! per-token pricing, token usage accounting, and the retry policy applied
//! to agent dispatches.

/// Model specs and the catalog.
pub mod config;
/// Retry policy with exponential backoff.
pub mod retry;
/// Token usage accounting.
pub mod usage;

pub use config::{default_catalog, ModelCatalog, ModelProvider, ModelSpec, DEFAULT_MODEL_ID};
pub use retry::RetryPolicy;
pub use usage::TokenUsage;
