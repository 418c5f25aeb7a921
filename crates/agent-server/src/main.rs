//! Agent HTTP Server
//!
//! Axum-based server exposing sessions, agents and providers over REST, and
//! streaming each agentic run over Server-Sent Events.

mod config;
mod handlers;
mod locks;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{
    LlmProvider, MemorySessionStore, Orchestrator, ProviderRouter, SessionStore,
    tools::builtin_registry,
};
use agent_runtime::{
    AnthropicConfig, AnthropicProvider, JsonFileSessionStore, OllamaProvider, OpenAiConfig,
    OpenAiProvider, RetryingProvider, WebFetchTool, WebSearchTool,
};

use crate::config::ServerConfig;
use crate::handlers::{
    abort_session, compact_session, compaction_status, create_agent, create_session, delete_agent,
    delete_session, generate_title, get_agent, get_default_agent, get_provider, get_provider_model,
    get_session, health_check, list_agents, list_messages, list_provider_models, list_providers,
    list_sessions, send_message, session_cost, update_session,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env();

    let providers = Arc::new(build_providers(&config).await?);
    tracing::info!(
        "Providers: {} (default: {}, model: {})",
        providers.provider_ids().join(", "),
        config.default_provider,
        config.default_model
    );

    let store: Arc<dyn SessionStore> = match &config.storage_path {
        Some(path) => Arc::new(JsonFileSessionStore::open(path).await?),
        None => {
            tracing::warn!("STORAGE_PATH not set - sessions are kept in memory");
            Arc::new(MemorySessionStore::new())
        }
    };

    let mut tools = builtin_registry(&store);
    tools.register(WebSearchTool::new()?);
    tools.register(WebFetchTool::new()?);
    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    let orchestrator = Orchestrator::builder()
        .provider(Arc::new(RetryingProvider::new(providers.clone())))
        .tools(tools)
        .store(store)
        .config(config.loop_config())
        .model(config.default_model.clone())
        .build()?;

    let addr = config.bind_addr.clone();
    let state = AppState::new(orchestrator, providers, config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 agent server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                    - Health check");
    tracing::info!("  GET  /provider                  - Providers and models");
    tracing::info!("  GET  /agent                     - Agent profiles");
    tracing::info!("  POST /agent                     - Register agent");
    tracing::info!("  POST /session                   - Create session");
    tracing::info!("  POST /session/{{id}}/message      - Run a turn (SSE)");
    tracing::info!("  POST /session/{{id}}/abort        - Stop the running turn");
    tracing::info!("  POST /session/{{id}}/compact      - Compact session");

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Register every configured provider. Ollama is always available; hosted
/// providers join when their API key is set.
async fn build_providers(config: &ServerConfig) -> anyhow::Result<ProviderRouter> {
    let ollama = OllamaProvider::from_env()?;
    if ollama.health_check().await {
        tracing::info!("✓ Connected to Ollama");
        if let Ok(models) = ollama.local_models().await {
            for model in models {
                tracing::info!("  Model: {}", model);
            }
        }
    } else {
        tracing::warn!("⚠ Ollama not available");
        tracing::warn!("  Make sure Ollama is running: ollama serve");
    }

    let mut router = ProviderRouter::new(config.default_provider.clone()).register(Arc::new(ollama));

    if let Some(anthropic) = AnthropicConfig::from_env() {
        router = router
            .register(Arc::new(AnthropicProvider::from_config(anthropic)?))
            .route("claude-", "anthropic");
        tracing::info!("✓ Anthropic configured");
    }

    if let Some(openai) = OpenAiConfig::from_env() {
        router = router
            .register(Arc::new(OpenAiProvider::from_config(openai)?))
            .route("gpt-", "openai")
            .route("o3", "openai");
        tracing::info!("✓ OpenAI configured");
    }

    if router.get(&config.default_provider).is_none() {
        anyhow::bail!(
            "DEFAULT_PROVIDER '{}' is not configured (available: {})",
            config.default_provider,
            router.provider_ids().join(", ")
        );
    }

    Ok(router)
}

/// Build the HTTP router
pub fn app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/provider", get(list_providers))
        .route("/provider/{id}", get(get_provider))
        .route("/provider/{id}/model", get(list_provider_models))
        .route("/provider/{id}/model/{model_id}", get(get_provider_model))
        // Agents
        .route("/agent", get(list_agents).post(create_agent))
        .route("/agent/default", get(get_default_agent))
        .route("/agent/{id}", get(get_agent).delete(delete_agent))
        // Sessions
        .route("/session", get(list_sessions).post(create_session))
        .route(
            "/session/{id}",
            get(get_session).patch(update_session).delete(delete_session),
        )
        .route("/session/{id}/message", get(list_messages).post(send_message))
        .route("/session/{id}/abort", post(abort_session))
        .route("/session/{id}/generate-title", post(generate_title))
        .route("/session/{id}/cost", get(session_cost))
        .route("/session/{id}/compaction", get(compaction_status))
        .route("/session/{id}/compact", post(compact_session))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
