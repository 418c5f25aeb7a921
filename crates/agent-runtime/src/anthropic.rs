//! Anthropic Claude Provider
//!
//! Messages API with native tool use. Extended thinking blocks are surfaced as
//! reasoning. Token counts come from the API's usage block.

use agent_core::{
    error::ProviderError,
    message::{ChatRole, HistoryEntry, StopReason},
    provider::{
        GenerateResult, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo, TokenCounting,
        TokenUsage, ToolCallRequest,
    },
    tool::ToolSchema,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::catalog::{self, ModelSpec};
use crate::http;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER_ID: &str = "anthropic";

/// Smallest thinking budget the API accepts
const MIN_THINKING_BUDGET: u32 = 1024;

const MODELS: &[ModelSpec] = &[
    ModelSpec {
        id: "claude-opus-4",
        name: "Claude Opus 4",
        context_limit: 200_000,
        output_limit: 32_000,
        input_price: 15.0,
        output_price: 75.0,
    },
    ModelSpec {
        id: "claude-sonnet-4",
        name: "Claude Sonnet 4",
        context_limit: 200_000,
        output_limit: 64_000,
        input_price: 3.0,
        output_price: 15.0,
    },
    ModelSpec {
        id: "claude-3-7-sonnet",
        name: "Claude 3.7 Sonnet",
        context_limit: 200_000,
        output_limit: 64_000,
        input_price: 3.0,
        output_price: 15.0,
    },
    ModelSpec {
        id: "claude-3-5-haiku",
        name: "Claude 3.5 Haiku",
        context_limit: 200_000,
        output_limit: 8_192,
        input_price: 0.8,
        output_price: 4.0,
    },
];

/// Anthropic provider configuration
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.into(),
            timeout_secs: http::DEFAULT_TIMEOUT_SECS,
        }
    }

    /// `None` when `ANTHROPIC_API_KEY` is unset
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty())?;
        let mut config = Self::new(api_key);
        if let Some(timeout) = std::env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
        {
            config.timeout_secs = timeout;
        }
        Some(config)
    }
}

/// Anthropic LLM provider
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn from_config(config: AnthropicConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            config,
        })
    }

    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::from_config(AnthropicConfig::new(api_key))
    }

    fn build_request(
        history: &[HistoryEntry],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> AnthropicRequest {
        let mut system: Vec<String> = options.system_prompt.iter().cloned().collect();
        let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(history.len());

        for entry in history {
            let role = match entry.role {
                ChatRole::System => {
                    system.push(entry.content.clone());
                    continue;
                }
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            // the API wants alternating roles
            match messages.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&entry.content);
                }
                _ => messages.push(AnthropicMessage {
                    role,
                    content: entry.content.clone(),
                }),
            }
        }

        // thinking needs max_tokens above its budget and rejects a custom temperature
        let thinking = options.thinking_budget.map(|budget| AnthropicThinking {
            kind: "enabled",
            budget_tokens: budget.max(MIN_THINKING_BUDGET),
        });
        let max_tokens = match &thinking {
            Some(t) if options.max_tokens <= t.budget_tokens => {
                t.budget_tokens.saturating_add(options.max_tokens)
            }
            _ => options.max_tokens,
        };
        let temperature = thinking.is_none().then_some(options.temperature);

        AnthropicRequest {
            model: options.model.clone(),
            max_tokens,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
            tools: tools
                .iter()
                .map(|t| AnthropicTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters_json(),
                })
                .collect(),
            temperature,
            thinking,
        }
    }

    fn convert_response(response: AnthropicResponse, model: &str) -> GenerateResult {
        let mut result = GenerateResult::default();

        for block in response.content {
            match block {
                ContentBlock::Text { text } => result.text.push_str(&text),
                ContentBlock::Thinking { thinking } => result.reasoning.push_str(&thinking),
                ContentBlock::ToolUse { id, name, input } => {
                    result
                        .tool_calls
                        .push(ToolCallRequest::new(id, name, input.to_string()));
                }
                ContentBlock::Other => {}
            }
        }

        result.usage = TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens);
        result.cost = catalog::cost(MODELS, model, &result.usage);
        result.stop_reason = match response.stop_reason.as_deref() {
            Some("end_turn" | "stop_sequence") => Some(StopReason::EndTurn),
            Some("tool_use") => Some(StopReason::ToolCalls),
            Some("max_tokens") => Some(StopReason::MaxTokens),
            _ => None,
        };
        result
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<AnthropicThinking>,
}

#[derive(Serialize)]
struct AnthropicThinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: PROVIDER_ID.into(),
            name: "Anthropic".into(),
            models: catalog::infos(PROVIDER_ID, MODELS),
            token_counting: TokenCounting::Exact,
        }
    }

    #[instrument(skip(self, history, tools), fields(provider = "anthropic", model = %options.model))]
    async fn generate(
        &self,
        history: &[HistoryEntry],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<GenerateResult, ProviderError> {
        debug!("Generating with {} history entries and {} tools", history.len(), tools.len());

        let request = Self::build_request(history, tools, options);
        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| http::from_reqwest(PROVIDER_ID, &e))?;

        let body: AnthropicResponse = http::check(PROVIDER_ID, response)
            .await?
            .json()
            .await
            .map_err(|e| http::from_reqwest(PROVIDER_ID, &e))?;

        Ok(Self::convert_response(body, &options.model))
    }

    fn model(&self, model_id: &str) -> Option<ModelInfo> {
        MODELS
            .iter()
            .filter(|m| model_id.starts_with(m.id))
            .max_by_key(|m| m.id.len())
            .map(|m| ModelInfo {
                id: model_id.into(),
                ..m.info(PROVIDER_ID)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_merges_roles_and_lifts_system() {
        let history = vec![
            HistoryEntry::system("summary so far"),
            HistoryEntry::user("hi"),
            HistoryEntry::user("Tool result:\n[]"),
            HistoryEntry::assistant("hello"),
        ];
        let options = GenerationOptions {
            model: "claude-sonnet-4-20250514".into(),
            system_prompt: Some("be brief".into()),
            ..Default::default()
        };
        let request = AnthropicProvider::build_request(&history, &[], &options);

        assert_eq!(request.system.as_deref(), Some("be brief\n\nsummary so far"));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].content, "hi\n\nTool result:\n[]");

        let wire = serde_json::to_value(&request).unwrap();
        assert!(wire.get("tools").is_none());
        assert!(wire.get("thinking").is_none());
        assert!(wire.get("temperature").is_some());
    }

    #[test]
    fn test_thinking_budget_is_sent() {
        let options = GenerationOptions {
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 4096,
            thinking_budget: Some(8000),
            ..Default::default()
        };
        let request = AnthropicProvider::build_request(&[HistoryEntry::user("why?")], &[], &options);
        let wire = serde_json::to_value(&request).unwrap();

        assert_eq!(wire["thinking"], json!({ "type": "enabled", "budget_tokens": 8000 }));
        assert_eq!(wire["max_tokens"], 12_096);
        assert!(wire.get("temperature").is_none());

        let small = GenerationOptions {
            thinking_budget: Some(10),
            ..options
        };
        let wire = serde_json::to_value(AnthropicProvider::build_request(&[], &[], &small)).unwrap();
        assert_eq!(wire["thinking"]["budget_tokens"], 1024);
        assert_eq!(wire["max_tokens"], 4096);
    }

    #[test]
    fn test_response_conversion() {
        let raw = json!({
            "content": [
                { "type": "thinking", "thinking": "need the list", "signature": "x" },
                { "type": "text", "text": "Let me check." },
                { "type": "tool_use", "id": "toolu_1", "name": "todo_read", "input": {} }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 1000, "output_tokens": 100 }
        });
        let response: AnthropicResponse = serde_json::from_value(raw).unwrap();
        let result = AnthropicProvider::convert_response(response, "claude-sonnet-4-20250514");

        assert_eq!(result.reasoning, "need the list");
        assert_eq!(result.text, "Let me check.");
        assert_eq!(result.tool_calls, vec![ToolCallRequest::new("toolu_1", "todo_read", "{}")]);
        assert_eq!(result.stop_reason, Some(StopReason::ToolCalls));
        assert!((result.cost - 0.0045).abs() < 1e-9);
    }

    #[test]
    fn test_dated_model_lookup() {
        let provider = AnthropicProvider::new("key").unwrap();
        let model = provider.model("claude-3-5-haiku-20241022").unwrap();
        assert_eq!(model.output_limit, 8_192);
        assert!(provider.model("gpt-4o").is_none());
    }
}
