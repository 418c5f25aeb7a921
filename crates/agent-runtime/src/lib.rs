//! # agent-runtime
//!
//! Integrations for the agent: HTTP provider adapters, a retry wrapper, a
//! durable session store and the web tools.
//!
//! ## Providers
//!
//! - **Ollama** (default feature): local inference, native tool calls
//! - **Anthropic**: Claude Messages API with tool use and thinking
//! - **OpenAI**: Chat Completions and compatible gateways
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::{Orchestrator, ProviderRouter};
//! use agent_runtime::{AnthropicProvider, OllamaProvider, RetryingProvider};
//!
//! let router = ProviderRouter::new("ollama")
//!     .register(Arc::new(OllamaProvider::from_env()?))
//!     .register(Arc::new(AnthropicProvider::new(key)?))
//!     .route("claude-", "anthropic");
//! let orchestrator = Orchestrator::builder()
//!     .provider(Arc::new(RetryingProvider::new(Arc::new(router))))
//!     .build()?;
//! ```

pub mod anthropic;
mod catalog;
pub mod http;
#[cfg(feature = "ollama")]
pub mod ollama;
pub mod openai;
pub mod retry;
pub mod storage;
pub mod tools;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use retry::{RetryPolicy, RetryingProvider};
pub use storage::JsonFileSessionStore;
pub use tools::{WebFetchTool, WebSearchTool};

// Re-export core types for convenience
pub use agent_core::{
    AgentError, Event, LlmProvider, Orchestrator, ProviderError, ProviderRouter, Result,
    SessionStore,
};
