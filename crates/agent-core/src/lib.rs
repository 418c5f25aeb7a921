//! # agent-core
//!
//! Core of the conversational agent: a provider-agnostic agentic loop over an
//! extensible tool registry and a pluggable session store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐   │
//! │  │  Agentic    │  │    Tools    │  │   LlmProvider       │   │
//! │  │    Loop     │──│   Registry  │──│   (Strategy)        │   │
//! │  └──────┬──────┘  └─────────────┘  └─────────────────────┘   │
//! │         │         ┌─────────────┐                            │
//! │         └─────────│SessionStore │                            │
//! │                   └─────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Orchestrator::run` returns a lazy stream of [`Event`]s that always ends
//! with `done`. The `LlmProvider` trait enables swapping between Ollama,
//! OpenAI, Anthropic, or any other provider without changing loop logic.

pub mod agent;
pub mod compaction;
pub mod error;
pub mod event;
pub mod identifier;
pub mod message;
pub mod orchestrator;
pub mod processor;
pub mod provider;
pub mod session;
pub mod token;
pub mod tool;
pub mod tools;

pub use agent::{AgentCatalog, AgentProfile};
pub use error::{AgentError, ProviderError, ProviderErrorKind, Result, StoreError, ToolError};
pub use event::{Event, EventStream};
pub use message::{HistoryEntry, Message, NewMessage, Part, Role, StopReason};
pub use orchestrator::{LoopConfig, Orchestrator, RunRequest};
pub use provider::{GenerateResult, GenerationOptions, LlmProvider, ProviderRouter, TokenUsage};
pub use session::{MemorySessionStore, SessionInfo, SessionStore};
pub use tool::{Tool, ToolRegistry, ToolResult};
