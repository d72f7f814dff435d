use crate::usage::TokenUsage;
use convoy_core::{ConvoyError, ConvoyResult};
use serde::{Deserialize, Serialize};

/// Vendor hosting a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    /// DeepSeek API.
    DeepSeek,
    /// Groq API.
    Groq,
    /// Anthropic API.
    Anthropic,
    /// OpenAI API.
    OpenAi,
    /// Google Gemini API.
    Google,
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelProvider::DeepSeek => write!(f, "deepseek"),
            ModelProvider::Groq => write!(f, "groq"),
            ModelProvider::Anthropic => write!(f, "anthropic"),
            ModelProvider::OpenAi => write!(f, "openai"),
            ModelProvider::Google => write!(f, "google"),
        }
    }
}

/// A model that an agent role can be bound to.
///
/// Prices are in USD per million tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Catalog key, e.g. `deepseek-chat`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Vendor serving the model.
    pub provider: ModelProvider,
    /// Maximum prompt plus completion tokens.
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    /// USD per million input tokens.
    #[serde(default)]
    pub input_price: f64,
    /// USD per million output tokens.
    #[serde(default)]
    pub output_price: f64,
}

fn default_context_window() -> u32 {
    128_000
}

impl ModelSpec {
    /// Creates a spec with zero prices and the default context window.
    pub fn new(id: impl Into<String>, name: impl Into<String>, provider: ModelProvider) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider,
            context_window: default_context_window(),
            input_price: 0.0,
            output_price: 0.0,
        }
    }

    /// Sets USD prices per million input and output tokens.
    pub fn with_prices(mut self, input_price: f64, output_price: f64) -> Self {
        self.input_price = input_price;
        self.output_price = output_price;
        self
    }

    /// Overrides the context window size.
    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = tokens;
        self
    }

    /// Cost in USD of a call with the given token counts.
    pub fn cost(&self, usage: TokenUsage) -> f64 {
        let input = usage.input as f64 / 1_000_000.0 * self.input_price;
        let output = usage.output as f64 / 1_000_000.0 * self.output_price;
        input + output
    }
}

/// Ordered set of known models, unique by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    models: Vec<ModelSpec>,
}

impl ModelCatalog {
    /// Builds a catalog from `models`.
    pub fn new(models: Vec<ModelSpec>) -> Self {
        let mut catalog = Self::default();
        for model in models {
            catalog.insert(model);
        }
        catalog
    }

    /// Add a model, replacing any existing entry with the same id.
    pub fn insert(&mut self, model: ModelSpec) {
        match self.models.iter_mut().find(|m| m.id == model.id) {
            Some(existing) => *existing = model,
            None => self.models.push(model),
        }
    }

    /// Looks up a model by id.
    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Look up a model, failing with [`ConvoyError::UnknownModel`].
    pub fn require(&self, id: &str) -> ConvoyResult<&ModelSpec> {
        self.get(id)
            .ok_or_else(|| ConvoyError::UnknownModel(id.to_string()))
    }

    /// All models in insertion order.
    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// True when the catalog holds no models.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Default model id bound to every role.
pub const DEFAULT_MODEL_ID: &str = "gemini-2.0-flash-exp";

/// The built-in model catalog.
pub fn default_catalog() -> ModelCatalog {
    ModelCatalog::new(vec![
        ModelSpec::new("deepseek-chat", "DeepSeek V3", ModelProvider::DeepSeek)
            .with_prices(0.27, 1.10),
        ModelSpec::new("deepseek-coder", "DeepSeek Coder", ModelProvider::DeepSeek)
            .with_prices(0.14, 0.28),
        ModelSpec::new(
            "llama-3.3-70b-versatile",
            "Llama 3.3 70B (Groq)",
            ModelProvider::Groq,
        ),
        ModelSpec::new("gemini-2.0-flash", "Gemini 2.0 Flash", ModelProvider::Google)
            .with_context_window(1_000_000)
            .with_prices(0.075, 0.30),
        // Experimental tier is not billed.
        ModelSpec::new(
            DEFAULT_MODEL_ID,
            "Gemini 2.0 Flash (experimental)",
            ModelProvider::Google,
        )
        .with_context_window(1_000_000),
    ])
}
