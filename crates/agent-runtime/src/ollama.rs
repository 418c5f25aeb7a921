//! Ollama LLM Provider
//!
//! Local inference through Ollama's `/api/chat` with native tool calls.
//! Token counts use `prompt_eval_count`/`eval_count` when Ollama reports them
//! and fall back to a length estimate otherwise. Local inference costs nothing.

use agent_core::{
    error::ProviderError,
    identifier::{self, IdKind},
    message::{ChatRole, HistoryEntry, StopReason},
    provider::{
        GenerateResult, GenerationOptions, LlmProvider, ModelInfo, ModelPricing, ProviderInfo,
        TokenCounting, TokenUsage, ToolCallRequest,
    },
    token,
    tool::ToolSchema,
};
use async_trait::async_trait;
use ollama_rs::Ollama;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::http;

const PROVIDER_ID: &str = "ollama";

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Models advertised before the server has been asked
    pub models: Vec<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: http::DEFAULT_TIMEOUT_SECS,
            models: vec!["llama3.2".into()],
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);
        let timeout_secs = std::env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(http::DEFAULT_TIMEOUT_SECS);

        Self {
            host,
            port,
            timeout_secs,
            ..Default::default()
        }
    }

    fn base_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.port)
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    http: Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: Ollama::new(config.host.clone(), config.port),
            http: http::client(config.timeout_secs)?,
            config,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Result<Self, ProviderError> {
        Self::from_config(OllamaConfig::default())
    }

    /// Models installed on the Ollama server
    pub async fn local_models(&self) -> Result<Vec<String>, ProviderError> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| ProviderError::transport(format!("ollama: {e}")))?;
        Ok(models.into_iter().map(|m| m.name).collect())
    }

    fn model_info(id: &str) -> ModelInfo {
        ModelInfo {
            id: id.into(),
            name: id.into(),
            provider_id: PROVIDER_ID.into(),
            // not exposed by the chat API
            context_limit: 0,
            output_limit: 0,
            supports_tools: true,
            pricing: ModelPricing::default(),
        }
    }

    fn build_request(
        history: &[HistoryEntry],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> OllamaChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(system) = &options.system_prompt {
            messages.push(OllamaMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.extend(history.iter().map(|entry| OllamaMessage {
            role: match entry.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: entry.content.clone(),
        }));

        OllamaChatRequest {
            model: options.model.clone(),
            messages,
            stream: false,
            tools: tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters_json(),
                        }
                    })
                })
                .collect(),
            options: OllamaOptions {
                temperature: options.temperature,
                top_p: options.top_p,
                num_predict: options.max_tokens,
            },
            // Ollama has no budget, only an on/off switch
            think: options.thinking_budget.map(|_| true),
        }
    }

    fn convert_response(response: OllamaChatResponse, request: &OllamaChatRequest) -> GenerateResult {
        let mut result = GenerateResult {
            text: response.message.content,
            reasoning: response.message.thinking.unwrap_or_default(),
            ..Default::default()
        };
        result.tool_calls = response
            .message
            .tool_calls
            .into_iter()
            .map(|c| {
                ToolCallRequest::new(
                    identifier::ascending(IdKind::Tool),
                    c.function.name,
                    c.function.arguments.to_string(),
                )
            })
            .collect();

        let input = response.prompt_eval_count.unwrap_or_else(|| {
            request
                .messages
                .iter()
                .map(|m| token::estimate(&m.content))
                .sum()
        });
        let output = response
            .eval_count
            .unwrap_or_else(|| token::estimate(&result.text) + token::estimate(&result.reasoning));
        result.usage = TokenUsage::new(input, output);

        // Ollama reports "stop" even when it returns tool calls
        result.stop_reason = match response.done_reason.as_deref() {
            Some("length") => Some(StopReason::MaxTokens),
            Some("stop") if result.tool_calls.is_empty() => Some(StopReason::EndTurn),
            _ => None,
        };
        result
    }
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: PROVIDER_ID.into(),
            name: "Ollama".into(),
            models: self.config.models.iter().map(|m| Self::model_info(m)).collect(),
            token_counting: TokenCounting::Exact,
        }
    }

    #[instrument(skip(self, history, tools), fields(provider = "ollama", model = %options.model))]
    async fn generate(
        &self,
        history: &[HistoryEntry],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<GenerateResult, ProviderError> {
        debug!("Generating with {} history entries and {} tools", history.len(), tools.len());

        let request = Self::build_request(history, tools, options);
        let response = self
            .http
            .post(format!("{}/api/chat", self.config.base_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| http::from_reqwest(PROVIDER_ID, &e))?;

        let body: OllamaChatResponse = http::check(PROVIDER_ID, response)
            .await?
            .json()
            .await
            .map_err(|e| http::from_reqwest(PROVIDER_ID, &e))?;

        Ok(Self::convert_response(body, &request))
    }

    async fn health_check(&self) -> bool {
        match self.client.list_local_models().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                false
            }
        }
    }

    /// Any model name may be pulled locally
    fn model(&self, model_id: &str) -> Option<ModelInfo> {
        self.config
            .models
            .iter()
            .any(|m| m == model_id)
            .then(|| Self::model_info(model_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OllamaChatRequest {
        OllamaProvider::build_request(
            &[HistoryEntry::user("Hello")],
            &[],
            &GenerationOptions {
                system_prompt: Some("You are helpful.".into()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.host, "http://localhost");
        assert_eq!(config.port, 11434);
        assert_eq!(config.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_message_conversion() {
        let request = request();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");

        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["stream"], false);
        assert_eq!(wire["options"]["num_predict"], 4096);
        assert!(wire.get("tools").is_none());
        assert!(wire.get("think").is_none());

        let thinking = OllamaProvider::build_request(
            &[HistoryEntry::user("Hello")],
            &[],
            &GenerationOptions {
                thinking_budget: Some(2048),
                ..Default::default()
            },
        );
        assert_eq!(serde_json::to_value(&thinking).unwrap()["think"], true);
    }

    #[test]
    fn test_tool_calls_override_stop() {
        let raw = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{ "function": { "name": "todo_read", "arguments": {} } }]
            },
            "done_reason": "stop",
            "prompt_eval_count": 30,
            "eval_count": 8
        });
        let response: OllamaChatResponse = serde_json::from_value(raw).unwrap();
        let result = OllamaProvider::convert_response(response, &request());

        assert_eq!(result.tool_calls.len(), 1);
        assert!(result.tool_calls[0].id.starts_with("tol_"));
        assert_eq!(result.tool_calls[0].arguments, "{}");
        assert_eq!(result.stop_reason, None);
        assert_eq!(result.usage, TokenUsage::new(30, 8));
        assert!(result.cost.abs() < f64::EPSILON);
    }

    #[test]
    fn test_usage_estimated_when_missing() {
        let raw = json!({ "message": { "content": "abcdefgh" }, "done_reason": "stop" });
        let response: OllamaChatResponse = serde_json::from_value(raw).unwrap();
        let result = OllamaProvider::convert_response(response, &request());
        assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(result.usage.output_tokens, 2);
        assert!(result.usage.input_tokens > 0);
    }
}
