//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all LLM providers (Anthropic, OpenAI-compatible,
//! Ollama, etc.) allowing the orchestrator to work with any backend without code
//! changes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{GenerationOptions, LlmProvider};
//!
//! let provider = AnthropicProvider::from_env()?;
//! let result = provider.generate(&history, &tools, &GenerationOptions::default()).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{HistoryEntry, StopReason};
use crate::tool::ToolSchema;

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "gpt-4o", "claude-sonnet-4-20250514")
    pub model: String,

    /// Explicit provider id; routing falls back to the model id when absent
    #[serde(default)]
    pub provider_id: Option<String>,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// System prompt, sent separately by providers that support it
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Token budget for extended reasoning; `None` leaves it off
    #[serde(default)]
    pub thinking_budget: Option<u32>,
}

const fn default_temperature() -> f32 { 0.7 }
const fn default_max_tokens() -> u32 { 4096 }
const fn default_top_p() -> f32 { 0.9 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            provider_id: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            system_prompt: None,
            thinking_budget: None,
        }
    }
}

/// A tool invocation requested by the model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-supplied or generated call id
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// Aggregated outcome of one provider call
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResult {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
    /// Monetary cost of this call
    pub cost: f64,
    /// Stop reason reported by the backend, if it reported one
    pub stop_reason: Option<StopReason>,
}

impl GenerateResult {
    /// Plain text answer, no tools
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_call(mut self, call: ToolCallRequest) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub const fn with_usage(mut self, usage: TokenUsage, cost: f64) -> Self {
        self.usage = usage;
        self.cost = cost;
        self
    }

    pub const fn with_stop_reason(mut self, reason: StopReason) -> Self {
        self.stop_reason = Some(reason);
        self
    }
}

/// Price per million tokens
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (usage.output_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

/// Information about a model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider_id: String,
    pub context_limit: u64,
    pub output_limit: u64,
    pub supports_tools: bool,
    pub pricing: ModelPricing,
}

/// How a provider variant counts tokens
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenCounting {
    /// Counts reported by the backend
    Exact,
    /// Length-based estimate (~4 chars per token)
    Estimated,
}

/// Provider metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider id (e.g., "anthropic", "ollama")
    pub id: String,

    /// Display name
    pub name: String,

    /// Known models
    pub models: Vec<ModelInfo>,

    pub token_counting: TokenCounting,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The orchestrator works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider information and capabilities
    fn info(&self) -> ProviderInfo;

    /// Run one generation over the history, advertising `tools` to the model.
    ///
    /// Timeouts must surface as a `transport` error.
    async fn generate(
        &self,
        history: &[HistoryEntry],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<GenerateResult, ProviderError>;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> bool {
        true
    }

    /// Look up a model served by this provider
    fn model(&self, model_id: &str) -> Option<ModelInfo> {
        self.info().models.into_iter().find(|m| m.id == model_id)
    }

    /// Estimate token count for text (provider-specific tokenization)
    fn estimate_tokens(&self, text: &str) -> u64 {
        crate::token::estimate(text)
    }
}

/// Unified provider routing requests to registered backends.
///
/// Resolution order: explicit `provider_id`, then the longest model id prefix
/// match, then the default provider.
pub struct ProviderRouter {
    providers: Vec<(String, Arc<dyn LlmProvider>)>,
    prefixes: Vec<(String, String)>,
    default_id: String,
}

impl ProviderRouter {
    pub fn new(default_id: impl Into<String>) -> Self {
        Self {
            providers: Vec::new(),
            prefixes: Vec::new(),
            default_id: default_id.into(),
        }
    }

    /// Register a provider under its own id
    pub fn register(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        let id = provider.info().id;
        self.providers.retain(|(existing, _)| existing != &id);
        self.providers.push((id, provider));
        self
    }

    /// Route model ids starting with `prefix` to `provider_id`
    pub fn route(mut self, prefix: impl Into<String>, provider_id: impl Into<String>) -> Self {
        self.prefixes.push((prefix.into(), provider_id.into()));
        self
    }

    pub fn get(&self, provider_id: &str) -> Option<&Arc<dyn LlmProvider>> {
        self.providers
            .iter()
            .find(|(id, _)| id == provider_id)
            .map(|(_, p)| p)
    }

    /// Pick the provider for a request
    pub fn resolve(&self, options: &GenerationOptions) -> Option<&Arc<dyn LlmProvider>> {
        if let Some(id) = options.provider_id.as_deref() {
            return self.get(id);
        }

        let by_prefix = self
            .prefixes
            .iter()
            .filter(|(prefix, _)| options.model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .and_then(|(_, id)| self.get(id));

        by_prefix
            .or_else(|| {
                self.providers
                    .iter()
                    .find(|(_, p)| p.model(&options.model).is_some())
                    .map(|(_, p)| p)
            })
            .or_else(|| self.get(&self.default_id))
    }

    pub fn provider_infos(&self) -> Vec<ProviderInfo> {
        self.providers.iter().map(|(_, p)| p.info()).collect()
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(|(id, _)| id.as_str()).collect()
    }
}

#[async_trait]
impl LlmProvider for ProviderRouter {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "router".into(),
            name: "Router".into(),
            models: self
                .providers
                .iter()
                .flat_map(|(_, p)| p.info().models)
                .collect(),
            token_counting: TokenCounting::Exact,
        }
    }

    async fn generate(
        &self,
        history: &[HistoryEntry],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<GenerateResult, ProviderError> {
        let provider = self.resolve(options).ok_or_else(|| {
            ProviderError::invalid_request(format!(
                "No provider available for model '{}'",
                options.model
            ))
        })?;
        tracing::debug!(provider = %provider.info().id, model = %options.model, "Routing generation");
        provider.generate(history, tools, options).await
    }

    async fn health_check(&self) -> bool {
        for (_, provider) in &self.providers {
            if !provider.health_check().await {
                return false;
            }
        }
        true
    }
}
