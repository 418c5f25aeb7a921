//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Classification of a provider failure.
///
/// Drives whether a retry layer above the loop should re-attempt the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Auth,
    RateLimit,
    Transport,
    InvalidRequest,
    Unknown,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Transport => "transport",
            Self::InvalidRequest => "invalid_request",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// LLM provider failure
#[derive(Error, Debug, Clone)]
#[error("Provider error ({kind}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Auth, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimit, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transport, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidRequest, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unknown, message)
    }

    /// Rate limits and transport failures are worth another attempt
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimit | ProviderErrorKind::Transport
        )
    }
}

/// Tool lookup/execution failure.
///
/// Never escapes the step loop: it is rendered into the tool result text.
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool '{0}' is not allowed for this agent")]
    Denied(String),

    #[error("{0}")]
    Execution(String),
}

/// Session store failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM provider error
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Tool error that had to surface (registry setup, not step execution)
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Durable state could not be read or written
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The user turn had no content
    #[error("Input must not be empty")]
    EmptyInput,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(e) => match e.kind {
                ProviderErrorKind::Auth => {
                    "Authentication with the AI service failed. Please check your credentials."
                        .into()
                }
                ProviderErrorKind::RateLimit => {
                    "You've made too many requests. Please wait a moment.".into()
                }
                ProviderErrorKind::Transport => {
                    "The AI service is currently unavailable. Please try again.".into()
                }
                ProviderErrorKind::InvalidRequest => {
                    format!("The AI service rejected the request: {}", e.message)
                }
                ProviderErrorKind::Unknown => {
                    format!("The AI service encountered an error: {}", e.message)
                }
            },
            Self::Tool(e) => format!("Tool error: {e}"),
            Self::Store(StoreError::NotFound(what)) => format!("Not found: {what}"),
            Self::Store(_) => "Session storage is unavailable. Please try again.".into(),
            Self::EmptyInput => "Please enter a message.".into(),
            Self::Config(_) => "The server is misconfigured.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ProviderError::transport("timeout").is_retryable());
        assert!(ProviderError::rate_limit("429").is_retryable());
        assert!(!ProviderError::auth("bad key").is_retryable());
        assert!(!ProviderError::invalid_request("bad").is_retryable());
        assert!(AgentError::from(ProviderError::transport("x")).is_retryable());
        assert!(!AgentError::EmptyInput.is_retryable());
    }

    #[test]
    fn test_display_includes_kind() {
        let err = ProviderError::rate_limit("slow down");
        assert_eq!(err.to_string(), "Provider error (rate_limit): slow down");
    }
}
