//! Agentic Loop
//!
//! Turns one user turn into a bounded sequence of provider calls and tool
//! executions, streaming an [`Event`] for every state transition.
//!
//! Each step is persisted as a unit once it completes: the assistant message
//! (step markers, reasoning, text, tool calls) plus a user-role message holding
//! the tool results. Dropping the stream mid-step leaves nothing half-written.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::agent::{AgentCatalog, AgentProfile};
use crate::error::{AgentError, Result, ToolError};
use crate::event::{Event, EventStream};
use crate::identifier::{self, IdKind};
use crate::message::{NewMessage, Part, Role, StopReason, ToolStatus};
use crate::processor::{DOOM_LOOP_THRESHOLD, DoomLoopDetector};
use crate::provider::{GenerateResult, GenerationOptions, LlmProvider, TokenUsage};
use crate::session::{MemorySessionStore, SessionHandle, SessionInfo, SessionStore};
use crate::tool::{ToolContext, ToolRegistry, ToolResult, ToolSchema};

/// Loop-control policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Hard cap on steps per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Keep stepping while the model requests tools
    #[serde(default = "default_true")]
    pub auto_continue: bool,

    /// Stop the run after a step that called the `question` tool
    #[serde(default = "default_true")]
    pub pause_on_question: bool,

    /// Identical consecutive tool calls tolerated; `None` disables the check
    #[serde(default = "default_doom_loop_threshold")]
    pub doom_loop_threshold: Option<usize>,
}

const fn default_max_steps() -> u32 { 50 }
const fn default_true() -> bool { true }
const fn default_doom_loop_threshold() -> Option<usize> { Some(DOOM_LOOP_THRESHOLD) }

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            auto_continue: true,
            pause_on_question: true,
            doom_loop_threshold: default_doom_loop_threshold(),
        }
    }
}

/// One user turn and its per-run overrides
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRequest {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub content: String,

    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    /// Extra system prompt text for this run
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Extended reasoning budget in tokens
    #[serde(default)]
    pub thinking_budget: Option<u32>,
    #[serde(default = "default_true")]
    pub tools_enabled: bool,
    #[serde(default)]
    pub auto_continue: Option<bool>,
    #[serde(default)]
    pub max_steps: Option<u32>,
}

impl RunRequest {
    pub fn new(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
            agent_id: None,
            content: content.into(),
            provider_id: None,
            model_id: None,
            system: None,
            temperature: None,
            max_tokens: None,
            thinking_budget: None,
            tools_enabled: true,
            auto_continue: None,
            max_steps: None,
        }
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub const fn max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

/// Settings resolved for one run from config, profile, session and request
struct RunPlan {
    profile: AgentProfile,
    options: GenerationOptions,
    tools: Vec<ToolSchema>,
    max_steps: u32,
    auto_continue: bool,
    pause_on_question: bool,
}

/// The agentic loop over a provider, a tool registry and a session store
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn SessionStore>,
    agents: Arc<RwLock<AgentCatalog>>,
    config: LoopConfig,
    options: GenerationOptions,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Profiles shared with the host, which may register more at runtime
    pub fn agents(&self) -> &Arc<RwLock<AgentCatalog>> {
        &self.agents
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run one user turn.
    ///
    /// The stream always ends with a `done` event. Provider and store failures
    /// produce an `error` event followed by `done(error)`.
    pub fn run(&self, request: RunRequest) -> EventStream {
        let this = self.clone();

        Box::pin(async_stream::stream! {
            let mut totals = TokenUsage::default();
            let mut total_cost = 0.0;

            let content = request.content.trim().to_string();
            if content.is_empty() {
                yield Event::error(AgentError::EmptyInput);
                yield Event::Done { usage: totals, stop_reason: StopReason::Error };
                return;
            }

            let agent_id = this.agents.read().await.resolve(request.agent_id.as_deref()).id.clone();
            let mut session = match SessionHandle::initialize(
                this.store.clone(),
                &request.session_id,
                request.user_id.as_deref(),
                &agent_id,
            )
            .await
            {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(session_id = %request.session_id, error = %e, "Session unavailable");
                    yield Event::error(e);
                    yield Event::Done { usage: totals, stop_reason: StopReason::Error };
                    return;
                }
            };

            let profile = this
                .agents
                .read()
                .await
                .resolve(request.agent_id.as_deref().or(Some(session.info().agent_id.as_str())))
                .clone();
            let plan = this.plan(&request, session.info(), profile);
            let mut detector = this.config.doom_loop_threshold.map(DoomLoopDetector::new);

            let user_message = match session.add_message(NewMessage::user(content)).await {
                Ok(message) => message,
                Err(e) => {
                    yield Event::error(e);
                    yield Event::Done { usage: totals, stop_reason: StopReason::Error };
                    return;
                }
            };

            tracing::debug!(
                session_id = %session.id(),
                agent = %plan.profile.id,
                model = %plan.options.model,
                max_steps = plan.max_steps,
                tools = plan.tools.len(),
                "Run started"
            );

            let mut last_reason = StopReason::MaxSteps;

            for step in 1..=plan.max_steps {
                yield Event::StepStart { step_number: step, max_steps: plan.max_steps };

                let history = match session.get_history().await {
                    Ok(history) => history,
                    Err(e) => {
                        yield Event::error(e);
                        yield Event::Done { usage: totals, stop_reason: StopReason::Error };
                        return;
                    }
                };

                let assistant_id = identifier::ascending(IdKind::Message);
                yield Event::MessageStart {
                    message_id: assistant_id.clone(),
                    parent_id: Some(user_message.id.clone()),
                };

                let result = match this.provider.generate(&history, &plan.tools, &plan.options).await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(session_id = %session.id(), step, error = %e, "Provider call failed");
                        yield Event::error(e);
                        yield Event::Done { usage: totals, stop_reason: StopReason::Error };
                        return;
                    }
                };

                let mut parts = vec![Part::StepStart { step_number: step, max_steps: plan.max_steps }];

                if !result.reasoning.is_empty() {
                    yield Event::Reasoning { text: result.reasoning.clone() };
                    parts.push(Part::Reasoning { text: result.reasoning.clone() });
                }
                if !result.text.is_empty() {
                    yield Event::Text { text: result.text.clone() };
                    parts.push(Part::text(result.text.clone()));
                }

                let mut result_parts = Vec::new();
                let mut asked = false;
                let mut doomed = false;

                for call in &result.tool_calls {
                    let mut call = call.clone();
                    if call.id.is_empty() {
                        call.id = identifier::ascending(IdKind::Tool);
                    }
                    parts.push(Part::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    });
                    yield Event::ToolCall { tool_call: call.clone() };

                    // refused calls never reach the doom detector
                    let outcome = if !plan.profile.allows(&call.name) {
                        ToolResult::failure(ToolError::Denied(call.name.clone()))
                    } else if detector
                        .as_mut()
                        .is_some_and(|d| d.record(&call.name, &call.arguments))
                    {
                        doomed = true;
                        tracing::warn!(session_id = %session.id(), tool = %call.name, "Doom loop detected");
                        ToolResult {
                            text: format!(
                                "Doom loop detected: tool '{}' called repeatedly with the same arguments",
                                call.name
                            ),
                            metadata: serde_json::Value::Null,
                            is_error: true,
                        }
                    } else {
                        tracing::debug!(session_id = %session.id(), step, tool = %call.name, "Executing tool");
                        let ctx = ToolContext {
                            session_id: session.id().to_string(),
                            message_id: assistant_id.clone(),
                            tool_call_id: call.id.clone(),
                            agent_id: plan.profile.id.clone(),
                        };
                        let outcome = this.tools.execute_call(&call, &ctx).await;
                        if plan.pause_on_question && call.name.eq_ignore_ascii_case("question") {
                            asked = true;
                        }
                        outcome
                    };

                    yield Event::ToolResult {
                        text: outcome.text.clone(),
                        tool_call_id: call.id.clone(),
                        is_error: outcome.is_error,
                    };
                    result_parts.push(Part::ToolResult {
                        tool_call_id: call.id,
                        output: outcome.text,
                        status: if outcome.is_error { ToolStatus::Error } else { ToolStatus::Completed },
                    });
                }

                let reason = decide_stop_reason(&result, asked, doomed);
                parts.push(Part::StepFinish {
                    step_number: step,
                    stop_reason: reason,
                    cost: result.cost,
                    input_tokens: result.usage.input_tokens,
                    output_tokens: result.usage.output_tokens,
                });

                let mut batch = vec![
                    NewMessage::new(Role::Assistant, parts)
                        .with_id(assistant_id)
                        .with_parent(user_message.id.clone())
                        .with_finish(reason),
                ];
                if !result_parts.is_empty() {
                    batch.push(NewMessage::new(Role::User, result_parts));
                }
                if let Err(e) = session.add_messages(batch).await {
                    yield Event::error(e);
                    yield Event::Done { usage: totals, stop_reason: StopReason::Error };
                    return;
                }
                if let Err(e) = session
                    .update_metadata(result.cost, result.usage.input_tokens, result.usage.output_tokens)
                    .await
                {
                    yield Event::error(e);
                    yield Event::Done { usage: totals, stop_reason: StopReason::Error };
                    return;
                }

                totals += result.usage;
                total_cost += result.cost;

                yield Event::StepFinish {
                    step_number: step,
                    stop_reason: reason,
                    cost: result.cost,
                    input_tokens: result.usage.input_tokens,
                    output_tokens: result.usage.output_tokens,
                };

                last_reason = reason;
                if reason != StopReason::ToolCalls || !plan.auto_continue {
                    break;
                }
            }

            // still asking for tools when the budget ran out
            let stop_reason = if last_reason == StopReason::ToolCalls && plan.auto_continue {
                StopReason::MaxSteps
            } else {
                last_reason
            };

            tracing::info!(
                session_id = %session.id(),
                stop_reason = %stop_reason,
                input_tokens = totals.input_tokens,
                output_tokens = totals.output_tokens,
                cost = total_cost,
                "Run finished"
            );
            yield Event::Done { usage: totals, stop_reason };
        })
    }

    fn plan(&self, request: &RunRequest, session: &SessionInfo, profile: AgentProfile) -> RunPlan {
        let mut options = self.options.clone();
        if let Some(model) = request
            .model_id
            .clone()
            .or_else(|| session.model_id.clone())
            .or_else(|| profile.model.clone())
        {
            options.model = model;
        }
        if let Some(provider_id) = request.provider_id.clone().or_else(|| session.provider_id.clone()) {
            options.provider_id = Some(provider_id);
        }
        if let Some(temperature) = request.temperature.or(profile.temperature) {
            options.temperature = temperature;
        }
        if let Some(max_tokens) = request.max_tokens.or(profile.max_tokens) {
            options.max_tokens = max_tokens;
        }
        if request.thinking_budget.is_some() {
            options.thinking_budget = request.thinking_budget;
        }

        let system: Vec<String> = [
            options.system_prompt.take(),
            Some(profile.system_prompt()),
            request.system.clone(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect();
        options.system_prompt = (!system.is_empty()).then(|| system.join("\n\n"));

        let tools = if request.tools_enabled {
            self.tools
                .schemas()
                .into_iter()
                .filter(|t| profile.allows(&t.name))
                .collect()
        } else {
            Vec::new()
        };

        let max_steps = request
            .max_steps
            .unwrap_or_else(|| self.config.max_steps.min(profile.max_steps))
            .max(1);

        RunPlan {
            auto_continue: request
                .auto_continue
                .unwrap_or(self.config.auto_continue && profile.auto_continue),
            pause_on_question: self.config.pause_on_question && profile.pause_on_question,
            profile,
            options,
            tools,
            max_steps,
        }
    }
}

/// Stop reason of a step.
///
/// A question or a doom loop ends the run. Without tool calls the step ends
/// the turn, honoring an explicit provider reason. With tool calls the run
/// continues unless the provider explicitly ended the turn.
fn decide_stop_reason(result: &GenerateResult, asked: bool, doomed: bool) -> StopReason {
    if asked {
        return StopReason::Question;
    }
    if doomed {
        return StopReason::DoomLoop;
    }
    if result.tool_calls.is_empty() {
        return match result.stop_reason {
            Some(reason) if reason != StopReason::ToolCalls => reason,
            _ => StopReason::EndTurn,
        };
    }
    match result.stop_reason {
        Some(reason @ (StopReason::EndTurn | StopReason::MaxTokens)) => reason,
        _ => StopReason::ToolCalls,
    }
}

/// Builder for the orchestrator
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    store: Option<Arc<dyn SessionStore>>,
    agents: AgentCatalog,
    config: LoopConfig,
    options: GenerationOptions,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            store: None,
            agents: AgentCatalog::new(),
            config: LoopConfig::default(),
            options: GenerationOptions::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool<T: crate::tool::Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn agents(mut self, agents: AgentCatalog) -> Self {
        self.agents = agents;
        self
    }

    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.options.model = model.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.options.system_prompt = Some(prompt.into());
        self
    }

    pub const fn max_steps(mut self, max: u32) -> Self {
        self.config.max_steps = max;
        self
    }

    /// Fails without a provider; the store defaults to memory
    pub fn build(self) -> Result<Orchestrator> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        Ok(Orchestrator {
            provider,
            tools: Arc::new(self.tools),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
            agents: Arc::new(RwLock::new(self.agents)),
            config: self.config,
            options: self.options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolCallRequest;

    fn with_calls(stop: Option<StopReason>) -> GenerateResult {
        GenerateResult {
            tool_calls: vec![ToolCallRequest::new("c", "todo_read", "{}")],
            stop_reason: stop,
            ..Default::default()
        }
    }

    #[test]
    fn test_stop_reason_without_tools() {
        assert_eq!(decide_stop_reason(&GenerateResult::text("hi"), false, false), StopReason::EndTurn);
        assert_eq!(
            decide_stop_reason(&GenerateResult::text("hi").with_stop_reason(StopReason::MaxTokens), false, false),
            StopReason::MaxTokens
        );
        assert_eq!(
            decide_stop_reason(&GenerateResult::text("").with_stop_reason(StopReason::ToolCalls), false, false),
            StopReason::EndTurn
        );
    }

    #[test]
    fn test_stop_reason_with_tools() {
        assert_eq!(decide_stop_reason(&with_calls(None), false, false), StopReason::ToolCalls);
        assert_eq!(
            decide_stop_reason(&with_calls(Some(StopReason::EndTurn)), false, false),
            StopReason::EndTurn
        );
        assert_eq!(decide_stop_reason(&with_calls(None), false, true), StopReason::DoomLoop);
        assert_eq!(decide_stop_reason(&with_calls(None), true, true), StopReason::Question);
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(Orchestrator::builder().build(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_loop_config_defaults() {
        let config: LoopConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_steps, 50);
        assert!(config.auto_continue && config.pause_on_question);
        assert_eq!(config.doom_loop_threshold, Some(3));
    }
}
