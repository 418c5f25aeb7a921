//! OpenAI-compatible Provider
//!
//! Chat Completions API, usable against OpenAI itself or any compatible
//! gateway (LiteLLM, OpenRouter, vLLM) through `OPENAI_BASE_URL`. Token counts
//! come from the usage block, estimated when a gateway omits it.

use agent_core::{
    error::ProviderError,
    message::{ChatRole, HistoryEntry, StopReason},
    provider::{
        GenerateResult, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo, TokenCounting,
        TokenUsage, ToolCallRequest,
    },
    token,
    tool::ToolSchema,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::catalog::{self, ModelSpec};
use crate::http;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const PROVIDER_ID: &str = "openai";

const MODELS: &[ModelSpec] = &[
    ModelSpec {
        id: "gpt-4o",
        name: "GPT-4o",
        context_limit: 128_000,
        output_limit: 16_384,
        input_price: 2.5,
        output_price: 10.0,
    },
    ModelSpec {
        id: "gpt-4o-mini",
        name: "GPT-4o mini",
        context_limit: 128_000,
        output_limit: 16_384,
        input_price: 0.15,
        output_price: 0.6,
    },
    ModelSpec {
        id: "gpt-4.1",
        name: "GPT-4.1",
        context_limit: 1_047_576,
        output_limit: 32_768,
        input_price: 2.0,
        output_price: 8.0,
    },
    ModelSpec {
        id: "o3-mini",
        name: "o3-mini",
        context_limit: 200_000,
        output_limit: 100_000,
        input_price: 1.1,
        output_price: 4.4,
    },
];

/// OpenAI-compatible provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.into(),
            timeout_secs: http::DEFAULT_TIMEOUT_SECS,
        }
    }

    /// `None` when `OPENAI_API_KEY` is unset
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())?;
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(timeout) = std::env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
        {
            config.timeout_secs = timeout;
        }
        Some(config)
    }
}

/// OpenAI-compatible LLM provider
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn from_config(config: OpenAiConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            config,
        })
    }

    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::from_config(OpenAiConfig::new(api_key))
    }

    fn build_request(
        history: &[HistoryEntry],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(system) = &options.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.extend(history.iter().map(|entry| ChatMessage {
            role: match entry.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: entry.content.clone(),
        }));

        ChatRequest {
            model: options.model.clone(),
            messages,
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
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
        }
    }

    fn convert_response(
        response: ChatResponse,
        request: &ChatRequest,
    ) -> Result<GenerateResult, ProviderError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::unknown("openai: response contained no choices"))?;

        let mut result = GenerateResult {
            text: choice.message.content.unwrap_or_default(),
            reasoning: choice.message.reasoning_content.unwrap_or_default(),
            ..Default::default()
        };
        result.tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolCallRequest::new(c.id, c.function.name, c.function.arguments))
            .collect();

        result.usage = match response.usage {
            Some(usage) => TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
            None => TokenUsage::new(
                request
                    .messages
                    .iter()
                    .map(|m| token::estimate(&m.content))
                    .sum(),
                token::estimate(&result.text) + token::estimate(&result.reasoning),
            ),
        };
        result.cost = catalog::cost(MODELS, &request.model, &result.usage);
        result.stop_reason = match choice.finish_reason.as_deref() {
            Some("stop") if result.tool_calls.is_empty() => Some(StopReason::EndTurn),
            Some("tool_calls" | "function_call") => Some(StopReason::ToolCalls),
            Some("length") => Some(StopReason::MaxTokens),
            _ => None,
        };
        Ok(result)
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: PROVIDER_ID.into(),
            name: "OpenAI".into(),
            models: catalog::infos(PROVIDER_ID, MODELS),
            token_counting: TokenCounting::Exact,
        }
    }

    #[instrument(skip(self, history, tools), fields(provider = "openai", model = %options.model))]
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
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| http::from_reqwest(PROVIDER_ID, &e))?;

        let body: ChatResponse = http::check(PROVIDER_ID, response)
            .await?
            .json()
            .await
            .map_err(|e| http::from_reqwest(PROVIDER_ID, &e))?;

        Self::convert_response(body, &request)
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
