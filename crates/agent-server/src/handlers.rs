//! HTTP Handlers

use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use agent_core::{
    AgentError, AgentProfile, Event, GenerationOptions, HistoryEntry, Message, RunRequest,
    SessionInfo, StoreError,
    agent::{AgentMode, Permission},
    compaction::{CompactionResult, CompactionStatus},
    provider::{ModelInfo, ProviderInfo},
    session::{NewSession, SessionStatus, SessionUpdate},
};

use crate::state::AppState;

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

const TITLE_PROMPT_CHARS: usize = 200;
const TITLE_MAX_CHARS: usize = 30;
const TITLE_MAX_TOKENS: u32 = 50;
const TITLE_INSTRUCTION: &str = "Write a short title for the conversation that starts with the \
                                 user message below. Reply with the title only, at most five \
                                 words, without quotes.";

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub providers: Vec<ProviderHealth>,
}

#[derive(Serialize)]
pub struct ProviderHealth {
    pub id: String,
    pub healthy: bool,
}

#[derive(Serialize)]
pub struct ProvidersResponse {
    pub default_provider: String,
    pub default_model: String,
    pub providers: Vec<ProviderInfo>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAgentsQuery {
    #[serde(default)]
    pub mode: Option<AgentMode>,
    #[serde(default)]
    pub include_hidden: bool,
}

/// Host-defined agent profile; omitted fields take the profile defaults
#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mode: Option<AgentMode>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub permissions: Option<Vec<Permission>>,
    #[serde(default)]
    pub auto_continue: Option<bool>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub pause_on_question: Option<bool>,
}

impl CreateAgentRequest {
    fn into_profile(self) -> AgentProfile {
        let mut profile = AgentProfile::new(self.id);
        if let Some(name) = self.name {
            profile.name = name;
        }
        if let Some(mode) = self.mode {
            profile.mode = mode;
        }
        if let Some(permissions) = self.permissions {
            profile.permissions = permissions;
        }
        profile.description = self.description;
        profile.hidden = self.hidden;
        profile.model = self.model;
        profile.temperature = self.temperature;
        profile.max_tokens = self.max_tokens;
        profile.prompt = self.prompt;
        profile.auto_continue = self.auto_continue.unwrap_or(profile.auto_continue);
        profile.max_steps = self.max_steps.unwrap_or(profile.max_steps);
        profile.pause_on_question = self.pause_on_question.unwrap_or(profile.pause_on_question);
        profile
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// User turn posted to a session
#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub content: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools_enabled: Option<bool>,
    #[serde(default)]
    pub auto_continue: Option<bool>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub thinking_budget: Option<u32>,
}

impl PromptRequest {
    fn into_run(self, session_id: String) -> RunRequest {
        RunRequest {
            user_id: self.user_id,
            agent_id: self.agent_id,
            provider_id: self.provider_id,
            model_id: self.model_id,
            system: self.system,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools_enabled: self.tools_enabled.unwrap_or(true),
            auto_continue: self.auto_continue,
            max_steps: self.max_steps,
            thinking_budget: self.thinking_budget,
            ..RunRequest::new(session_id, self.content)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AbortResponse {
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct GenerateTitleRequest {
    pub message: String,
    #[serde(default)]
    pub model_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TitleResponse {
    pub title: String,
}

#[derive(Serialize)]
pub struct CostResponse {
    pub session_id: String,
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

fn error(status: StatusCode, code: &str, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: code.into(),
        }),
    )
}

fn not_found(what: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    error(StatusCode::NOT_FOUND, "NOT_FOUND", format!("Not found: {what}"))
}

fn store_error(e: StoreError) -> (StatusCode, Json<ErrorResponse>) {
    match e {
        StoreError::NotFound(what) => not_found(what),
        StoreError::Conflict(what) => error(StatusCode::CONFLICT, "CONFLICT", what),
        other => {
            tracing::error!("Session store error: {}", other);
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                AgentError::from(other).user_message(),
            )
        }
    }
}

fn session_busy(session_id: &str) -> (StatusCode, Json<ErrorResponse>) {
    error(
        StatusCode::CONFLICT,
        "SESSION_BUSY",
        format!("Session {session_id} already has a run in progress"),
    )
}

fn unknown_agent(agent_id: &str) -> (StatusCode, Json<ErrorResponse>) {
    error(StatusCode::BAD_REQUEST, "UNKNOWN_AGENT", format!("Unknown agent: {agent_id}"))
}

fn builtin_agent(agent_id: &str) -> (StatusCode, Json<ErrorResponse>) {
    error(
        StatusCode::BAD_REQUEST,
        "BUILTIN_AGENT",
        format!("Built-in agent {agent_id} cannot be replaced or deleted"),
    )
}

async fn existing_session(state: &AppState, session_id: &str) -> ApiResult<SessionInfo> {
    state
        .store()
        .get(session_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found(format!("session {session_id}")))
}

async fn ensure_agent(state: &AppState, agent_id: &str) -> ApiResult<()> {
    if state.orchestrator.agents().read().await.get(agent_id).is_none() {
        return Err(unknown_agent(agent_id));
    }
    Ok(())
}

/// Model serving a session, when its provider knows it
fn session_model(state: &AppState, info: &SessionInfo) -> Option<ModelInfo> {
    let options = GenerationOptions {
        model: info
            .model_id
            .clone()
            .unwrap_or_else(|| state.config.default_model.clone()),
        provider_id: info.provider_id.clone(),
        ..Default::default()
    };
    state.providers.resolve(&options)?.model(&options.model)
}

/// First line of a model reply, unquoted and cut to title length
fn clean_title(raw: &str) -> String {
    let line = raw.trim().lines().next().unwrap_or_default();
    let line = line.strip_prefix("Title:").unwrap_or(line);
    line.trim()
        .trim_matches(['"', '\''])
        .trim()
        .chars()
        .take(TITLE_MAX_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut providers = Vec::new();
    for id in state.providers.provider_ids() {
        let healthy = match state.providers.get(id) {
            Some(provider) => provider.health_check().await,
            None => false,
        };
        providers.push(ProviderHealth { id: id.into(), healthy });
    }

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        providers,
    })
}

/// Registered providers with their models and pricing
pub async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        default_provider: state.config.default_provider.clone(),
        default_model: state.config.default_model.clone(),
        providers: state.providers.provider_infos(),
    })
}

pub async fn get_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> ApiResult<Json<ProviderInfo>> {
    state
        .providers
        .get(&provider_id)
        .map(|p| Json(p.info()))
        .ok_or_else(|| not_found(format!("provider {provider_id}")))
}

pub async fn list_provider_models(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> ApiResult<Json<Vec<ModelInfo>>> {
    state
        .providers
        .get(&provider_id)
        .map(|p| Json(p.info().models))
        .ok_or_else(|| not_found(format!("provider {provider_id}")))
}

pub async fn get_provider_model(
    State(state): State<AppState>,
    Path((provider_id, model_id)): Path<(String, String)>,
) -> ApiResult<Json<ModelInfo>> {
    let provider = state
        .providers
        .get(&provider_id)
        .ok_or_else(|| not_found(format!("provider {provider_id}")))?;
    provider
        .model(&model_id)
        .map(Json)
        .ok_or_else(|| not_found(format!("model {model_id}")))
}

/// Agent profiles, optionally filtered by mode
pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<ListAgentsQuery>,
) -> Json<Vec<AgentProfile>> {
    let agents = state.orchestrator.agents().read().await;
    Json(
        agents
            .list(query.mode, query.include_hidden)
            .into_iter()
            .cloned()
            .collect(),
    )
}

pub async fn get_default_agent(State(state): State<AppState>) -> Json<AgentProfile> {
    Json(state.orchestrator.agents().read().await.default_profile().clone())
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentProfile>> {
    state
        .orchestrator
        .agents()
        .read()
        .await
        .get(&agent_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found(format!("agent {agent_id}")))
}

/// Register a host-defined profile. Built-in ids are reserved.
pub async fn create_agent(
    State(state): State<AppState>,
    Json(payload): Json<CreateAgentRequest>,
) -> ApiResult<(StatusCode, Json<AgentProfile>)> {
    if payload.id.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "INVALID_AGENT", "Agent id must not be empty"));
    }
    let mut agents = state.orchestrator.agents().write().await;
    if agents.is_builtin(&payload.id) {
        return Err(builtin_agent(&payload.id));
    }
    let profile = payload.into_profile();
    agents.register(profile.clone());
    tracing::info!(agent_id = %profile.id, "Agent registered");
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    let mut agents = state.orchestrator.agents().write().await;
    if agents.get(&agent_id).is_none() {
        return Err(not_found(format!("agent {agent_id}")));
    }
    if !agents.unregister(&agent_id) {
        return Err(builtin_agent(&agent_id));
    }
    tracing::info!(agent_id = %agent_id, "Agent removed");
    Ok(Json(DeletedResponse { deleted: agent_id }))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<Vec<SessionInfo>>> {
    state
        .store()
        .list(query.user_id.as_deref(), query.limit)
        .await
        .map(Json)
        .map_err(store_error)
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionInfo>)> {
    let mut session = payload.id.map_or_else(NewSession::new, NewSession::with_id);
    if let Some(agent_id) = payload.agent_id {
        ensure_agent(&state, &agent_id).await?;
        session = session.agent(agent_id);
    }
    session.user_id = payload.user_id;
    session.title = payload.title;
    session.provider_id = payload.provider_id;
    session.model_id = payload.model_id;

    let info = state.store().create(session).await.map_err(store_error)?;
    tracing::info!(session_id = %info.id, agent_id = %info.agent_id, "Session created");
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionInfo>> {
    existing_session(&state, &session_id).await.map(Json)
}

pub async fn update_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<UpdateSessionRequest>,
) -> ApiResult<Json<SessionInfo>> {
    if let Some(agent_id) = payload.agent_id.as_deref() {
        ensure_agent(&state, agent_id).await?;
    }
    let update = SessionUpdate {
        title: payload.title,
        agent_id: payload.agent_id,
        status: payload.status,
        provider_id: payload.provider_id,
        model_id: payload.model_id,
        ..Default::default()
    };
    state
        .store()
        .update_session(&session_id, update)
        .await
        .map(Json)
        .map_err(store_error)
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    let _guard = state
        .locks
        .try_acquire(&session_id)
        .await
        .ok_or_else(|| session_busy(&session_id))?;
    state.store().delete(&session_id).await.map_err(store_error)?;
    tracing::info!(session_id = %session_id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    let (info, messages) = state.store().load(&session_id).await.map_err(store_error)?;
    if info.is_none() {
        return Err(not_found(format!("session {session_id}")));
    }
    Ok(Json(messages))
}

/// Run the agentic loop for one user turn, streaming every event over SSE.
///
/// The session lock travels with the stream. A client disconnect drops the
/// stream, and an abort request ends it with an error event; either way the
/// run is dropped and the session freed.
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<PromptRequest>,
) -> ApiResult<Response> {
    if let Some(agent_id) = payload.agent_id.as_deref() {
        ensure_agent(&state, agent_id).await?;
    }
    let mut guard = state
        .locks
        .try_acquire(&session_id)
        .await
        .ok_or_else(|| session_busy(&session_id))?;

    // compaction stays a separate request; only advertise it here
    let model = match state.store().get(&session_id).await {
        Ok(Some(info)) => session_model(&state, &info),
        _ => None,
    };
    if state
        .compactor
        .should_compact(&session_id, model.as_ref())
        .await
        .unwrap_or(false)
    {
        tracing::info!(session_id = %session_id, "Session is due for compaction");
    }

    let mut events = state.orchestrator.run(payload.into_run(session_id.clone()));
    let records = async_stream::stream! {
        loop {
            let next = tokio::select! {
                biased;
                () = guard.aborted() => None,
                event = events.next() => Some(event),
            };
            match next {
                Some(Some(event)) => yield Ok::<_, Infallible>(sse_record(&event)),
                Some(None) => break,
                None => {
                    tracing::info!(session_id = %session_id, "Run aborted");
                    yield Ok(sse_record(&Event::error("Run aborted")));
                    break;
                }
            }
        }
        drop(events);
        drop(guard);
        yield Ok(SseEvent::default().data("[DONE]"));
    };

    Ok(Sse::new(records).keep_alive(KeepAlive::default()).into_response())
}

fn sse_record(event: &Event) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::warn!("Failed to serialize {} event: {}", event.kind(), e);
        format!(r#"{{"type":"error","error":"{}"}}"#, event.kind())
    });
    SseEvent::default().data(data)
}

/// Stop the session's running turn, if any
pub async fn abort_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<AbortResponse> {
    let cancelled = state.locks.abort(&session_id).await;
    if cancelled {
        tracing::info!(session_id = %session_id, "Abort requested");
    }
    Json(AbortResponse { cancelled })
}

/// Name the session after its opening message
pub async fn generate_title(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<GenerateTitleRequest>,
) -> ApiResult<Json<TitleResponse>> {
    let info = existing_session(&state, &session_id).await?;
    if payload.message.trim().is_empty() {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "EMPTY_INPUT",
            AgentError::EmptyInput.user_message(),
        ));
    }

    let excerpt: String = payload.message.chars().take(TITLE_PROMPT_CHARS).collect();
    // an explicit model picks its own provider
    let provider_id = if payload.model_id.is_some() { None } else { info.provider_id };
    let options = GenerationOptions {
        model: payload
            .model_id
            .or(info.model_id)
            .unwrap_or_else(|| state.config.default_model.clone()),
        provider_id,
        max_tokens: TITLE_MAX_TOKENS,
        ..Default::default()
    };
    let prompt = format!("{TITLE_INSTRUCTION}\n\nUser message: \"{excerpt}\"\n\nTitle:");

    let result = state
        .orchestrator
        .provider()
        .generate(&[HistoryEntry::user(prompt)], &[], &options)
        .await
        .map_err(|e| {
            tracing::warn!(session_id = %session_id, "Title generation failed: {}", e);
            error(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", AgentError::from(e).user_message())
        })?;

    let title = clean_title(&result.text);
    if title.is_empty() {
        return Err(error(
            StatusCode::BAD_GATEWAY,
            "PROVIDER_ERROR",
            "The AI service returned an empty title.",
        ));
    }
    state
        .store()
        .update_session(
            &session_id,
            SessionUpdate {
                title: Some(title.clone()),
                ..Default::default()
            },
        )
        .await
        .map_err(store_error)?;
    tracing::info!(session_id = %session_id, title = %title, "Session titled");
    Ok(Json(TitleResponse { title }))
}

pub async fn session_cost(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<CostResponse>> {
    let info = existing_session(&state, &session_id).await?;
    Ok(Json(CostResponse {
        session_id: info.id,
        cost: info.cost,
        input_tokens: info.input_tokens,
        output_tokens: info.output_tokens,
        total_tokens: info.input_tokens + info.output_tokens,
        provider_id: info.provider_id,
        model_id: info.model_id,
    }))
}

pub async fn compaction_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<CompactionStatus>> {
    let info = existing_session(&state, &session_id).await?;
    let model = session_model(&state, &info);
    state
        .compactor
        .status(&session_id, model.as_ref())
        .await
        .map(Json)
        .map_err(store_error)
}

pub async fn compact_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<CompactionResult>> {
    let _guard = state
        .locks
        .try_acquire(&session_id)
        .await
        .ok_or_else(|| session_busy(&session_id))?;
    state
        .compactor
        .compact(&session_id)
        .await
        .map(Json)
        .map_err(store_error)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use agent_core::{
        GenerateResult, HistoryEntry, LlmProvider, Orchestrator, ProviderError, ProviderRouter,
        SessionStore, TokenUsage,
        provider::{ModelPricing, TokenCounting, ToolCallRequest},
        tool::ToolSchema,
        tools::{TodoItem, builtin_registry},
    };
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, header},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::config::ServerConfig;

    fn echo_info() -> ProviderInfo {
        ProviderInfo {
            id: "echo".into(),
            name: "Echo".into(),
            models: vec![ModelInfo {
                id: "echo-1".into(),
                name: "Echo 1".into(),
                provider_id: "echo".into(),
                context_limit: 8_000,
                output_limit: 1_000,
                supports_tools: true,
                pricing: ModelPricing::new(1.0, 2.0),
            }],
            token_counting: TokenCounting::Estimated,
        }
    }

    /// Calls `todo_read` once, then answers. Title prompts get a quoted title.
    struct Echo;

    #[async_trait]
    impl LlmProvider for Echo {
        fn info(&self) -> ProviderInfo {
            echo_info()
        }

        async fn generate(
            &self,
            history: &[HistoryEntry],
            _tools: &[ToolSchema],
            options: &GenerationOptions,
        ) -> Result<GenerateResult, ProviderError> {
            if history.iter().any(|h| h.content.starts_with(TITLE_INSTRUCTION)) {
                assert_eq!(options.max_tokens, TITLE_MAX_TOKENS);
                return Ok(GenerateResult::text("  \"Ping pong basics\"\n"));
            }
            let seen_result = history.iter().any(|h| h.content.starts_with("Tool result:"));
            let result = if seen_result {
                GenerateResult::text("pong")
            } else {
                GenerateResult::default().with_tool_call(ToolCallRequest::new("call_1", "todo_read", "{}"))
            };
            Ok(result.with_usage(TokenUsage::new(10, 5), 0.001))
        }
    }

    /// Never answers
    struct Stall;

    #[async_trait]
    impl LlmProvider for Stall {
        fn info(&self) -> ProviderInfo {
            echo_info()
        }

        async fn generate(
            &self,
            _history: &[HistoryEntry],
            _tools: &[ToolSchema],
            _options: &GenerationOptions,
        ) -> Result<GenerateResult, ProviderError> {
            std::future::pending().await
        }
    }

    fn state_with(provider: Arc<dyn LlmProvider>) -> AppState {
        let store: Arc<dyn SessionStore> = Arc::new(agent_core::MemorySessionStore::new());
        let orchestrator = Orchestrator::builder()
            .provider(provider.clone())
            .tools(builtin_registry(&store))
            .store(store)
            .model("echo-1")
            .build()
            .unwrap();
        let providers = Arc::new(ProviderRouter::new("echo").register(provider));
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            storage_path: None,
            default_provider: "echo".into(),
            default_model: "echo-1".into(),
            max_steps: None,
        };
        AppState::new(orchestrator, providers, config)
    }

    fn state() -> AppState {
        state_with(Arc::new(Echo))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn sse_payloads(body: &str) -> Vec<String> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(str::to_string)
            .collect()
    }

    fn sse_events(body: &str) -> Vec<Event> {
        let payloads = sse_payloads(body);
        assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));
        payloads[..payloads.len() - 1]
            .iter()
            .map(|p| serde_json::from_str(p).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_session_crud() {
        let state = state();

        let (status, body) = call(
            crate::app(state.clone()),
            "POST",
            "/session",
            Some(json!({ "id": "ses_a", "user_id": "u1", "title": "First" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["agent_id"], "build");

        let (status, _) = call(crate::app(state.clone()), "POST", "/session", Some(json!({ "id": "ses_a" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            crate::app(state.clone()),
            "PATCH",
            "/session/ses_a",
            Some(json!({ "title": "Renamed", "status": "archived" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let info: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(info["title"], "Renamed");
        assert_eq!(info["status"], "archived");

        let (_, body) = call(crate::app(state.clone()), "GET", "/session?user_id=u1", None).await;
        assert_eq!(serde_json::from_str::<Vec<Value>>(&body).unwrap().len(), 1);

        let (status, _) = call(crate::app(state.clone()), "DELETE", "/session/ses_a", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(crate::app(state), "GET", "/session/ses_a", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_rejected() {
        let (status, body) =
            call(crate::app(state()), "POST", "/session", Some(json!({ "agent_id": "nope" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("UNKNOWN_AGENT"));
    }

    #[tokio::test]
    async fn test_message_streams_events_then_done_marker() {
        let state = state();
        let (status, body) = call(
            crate::app(state.clone()),
            "POST",
            "/session/ses_chat/message",
            Some(json!({ "content": "ping" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let events = sse_events(&body);
        assert!(events.iter().any(|e| matches!(e, Event::ToolResult { is_error: false, .. })));
        assert!(events.iter().any(|e| matches!(e, Event::Text { text } if text == "pong")));
        assert!(events.last().is_some_and(Event::is_terminal));

        let (_, body) = call(crate::app(state.clone()), "GET", "/session/ses_chat/message", None).await;
        assert_eq!(serde_json::from_str::<Vec<Value>>(&body).unwrap().len(), 4);

        let (_, body) = call(crate::app(state.clone()), "GET", "/session/ses_chat/cost", None).await;
        let cost: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(cost["total_tokens"], 30);

        // stream finished, so the session is free again
        assert!(!state.locks.is_busy("ses_chat").await);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_conflict() {
        let state = state();
        let _running = state.locks.try_acquire("ses_busy").await.unwrap();
        let (status, body) = call(
            crate::app(state),
            "POST",
            "/session/ses_busy/message",
            Some(json!({ "content": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.contains("SESSION_BUSY"));
    }

    #[tokio::test]
    async fn test_abort_ends_the_running_stream() {
        let state = state_with(Arc::new(Stall));
        let (_, body) = call(crate::app(state.clone()), "POST", "/session/ses_idle/abort", None).await;
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["cancelled"], false);

        let running = tokio::spawn(call(
            crate::app(state.clone()),
            "POST",
            "/session/ses_stall/message",
            Some(json!({ "content": "hello?" })),
        ));
        tokio::time::timeout(Duration::from_secs(5), async {
            while !state.locks.is_busy("ses_stall").await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let (status, body) = call(crate::app(state.clone()), "POST", "/session/ses_stall/abort", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["cancelled"], true);

        let (status, body) = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        let events = sse_events(&body);
        assert!(matches!(events.last(), Some(Event::Error { error }) if error == "Run aborted"));
        assert!(!state.locks.is_busy("ses_stall").await);

        // the user turn was written before the provider stalled
        let (_, body) = call(crate::app(state), "GET", "/session/ses_stall/message", None).await;
        assert_eq!(serde_json::from_str::<Vec<Value>>(&body).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_generate_title() {
        let state = state();
        call(crate::app(state.clone()), "POST", "/session", Some(json!({ "id": "ses_t" }))).await;

        let (status, body) = call(
            crate::app(state.clone()),
            "POST",
            "/session/ses_t/generate-title",
            Some(json!({ "message": "How do I play ping pong well?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["title"], "Ping pong basics");

        let (_, body) = call(crate::app(state.clone()), "GET", "/session/ses_t", None).await;
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["title"], "Ping pong basics");

        let (status, _) = call(
            crate::app(state.clone()),
            "POST",
            "/session/missing/generate-title",
            Some(json!({ "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            crate::app(state),
            "POST",
            "/session/ses_t/generate-title",
            Some(json!({ "message": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("EMPTY_INPUT"));
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("Title: 'Rust lifetimes'\nextra"), "Rust lifetimes");
        assert_eq!(
            clean_title("A very long title that keeps going past the limit"),
            "A very long title that keeps g"
        );
        assert_eq!(clean_title("  \n"), "");
    }

    #[tokio::test]
    async fn test_agents_and_providers() {
        let state = state();
        let (_, body) = call(crate::app(state.clone()), "GET", "/agent", None).await;
        let agents: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(agents[0]["id"], "build");
        assert!(agents.iter().all(|a| a["id"] != "compaction"));

        let (_, body) = call(crate::app(state.clone()), "GET", "/agent?include_hidden=true", None).await;
        let agents: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert!(agents.iter().any(|a| a["id"] == "compaction"));

        let (_, body) = call(crate::app(state.clone()), "GET", "/agent?mode=subagent", None).await;
        let agents: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert!(!agents.is_empty());
        assert!(agents.iter().all(|a| a["mode"] == "subagent"));

        let (status, _) = call(crate::app(state.clone()), "GET", "/agent/general", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(crate::app(state.clone()), "GET", "/agent/default", None).await;
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["id"], "build");

        let (_, body) = call(crate::app(state.clone()), "GET", "/provider", None).await;
        let providers: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(providers["default_provider"], "echo");
        assert_eq!(providers["providers"][0]["id"], "echo");

        let (status, body) = call(crate::app(state.clone()), "GET", "/provider/echo", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["name"], "Echo");
        let (_, body) = call(crate::app(state.clone()), "GET", "/provider/echo/model", None).await;
        assert_eq!(serde_json::from_str::<Vec<Value>>(&body).unwrap()[0]["id"], "echo-1");
        let (status, body) = call(crate::app(state.clone()), "GET", "/provider/echo/model/echo-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["context_limit"], 8_000);

        for uri in ["/provider/nope", "/provider/nope/model", "/provider/echo/model/nope"] {
            let (status, _) = call(crate::app(state.clone()), "GET", uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_custom_agent_lifecycle() {
        let state = state();
        let (status, body) = call(
            crate::app(state.clone()),
            "POST",
            "/agent",
            Some(json!({
                "id": "auditor",
                "description": "Reviews diffs",
                "max_steps": 5,
                "permissions": [{ "tool_name": "todo_write", "action": "deny" }],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let profile: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(profile["name"], "auditor");
        assert_eq!(profile["max_steps"], 5);
        assert_eq!(profile["auto_continue"], true);

        // sessions can now pick it
        let (status, _) = call(
            crate::app(state.clone()),
            "POST",
            "/session",
            Some(json!({ "agent_id": "auditor" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) =
            call(crate::app(state.clone()), "POST", "/agent", Some(json!({ "id": "build" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("BUILTIN_AGENT"));

        let (status, body) = call(crate::app(state.clone()), "DELETE", "/agent/auditor", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["deleted"], "auditor");

        let (status, _) = call(crate::app(state.clone()), "DELETE", "/agent/auditor", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(crate::app(state.clone()), "DELETE", "/agent/general", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(crate::app(state), "GET", "/agent/general", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_recreated_session_starts_without_todos() {
        let state = state();
        call(crate::app(state.clone()), "POST", "/session", Some(json!({ "id": "ses_todo" }))).await;
        let item = TodoItem {
            id: "1".into(),
            content: "write the report".into(),
            status: agent_core::tools::TodoStatus::Pending,
            priority: agent_core::tools::TodoPriority::High,
        };
        state.store().save_todos("ses_todo", vec![item]).await.unwrap();

        let (status, _) = call(crate::app(state.clone()), "DELETE", "/session/ses_todo", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        call(crate::app(state.clone()), "POST", "/session", Some(json!({ "id": "ses_todo" }))).await;

        let (_, body) = call(
            crate::app(state.clone()),
            "POST",
            "/session/ses_todo/message",
            Some(json!({ "content": "what is left?" })),
        )
        .await;
        let read = sse_events(&body)
            .into_iter()
            .find_map(|e| match e {
                Event::ToolResult { text, .. } => Some(text),
                _ => None,
            })
            .unwrap();
        assert_eq!(read, "[]");
        assert!(state.store().load_todos("ses_todo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compaction_endpoints() {
        let state = state();
        call(crate::app(state.clone()), "POST", "/session", Some(json!({ "id": "ses_c" }))).await;

        let (_, body) = call(crate::app(state.clone()), "GET", "/session/ses_c/compaction", None).await;
        let status: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status["should_compact"], false);
        assert_eq!(status["context_overflow"], false);
        assert_eq!(status["remaining_until_compaction"], 50);

        let (status, _) = call(crate::app(state.clone()), "POST", "/session/ses_c/compact", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(crate::app(state), "GET", "/session/ses_c", None).await;
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["compaction_count"], 1);

        let (status, _) = call(crate::app(self::state()), "GET", "/session/missing/compaction", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
