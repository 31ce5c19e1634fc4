//! Voice orchestrator server binary

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use voice_orchestrator_config::{Settings, StaticConfigRepository};
use voice_orchestrator_persistence::JsonlHistorySink;
use voice_orchestrator_providers::{register_builtin_providers, ProviderRegistry};
use voice_orchestrator_server::{router, AppState, ServerError, SessionManager};
use voice_orchestrator_tools::{DeclaredTool, ToolRegistry};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let config_path = std::env::args().nth(1);
    let settings = Settings::load(config_path.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.observability.log_filter.clone())),
        )
        .init();

    if settings.observability.metrics_enabled {
        voice_orchestrator_server::metrics::init_metrics();
    }

    let mut registry = ProviderRegistry::new();
    register_builtin_providers(&mut registry);

    // Tools declared in configuration are exposed to the LLM; executors are
    // wired by the embedding deployment
    let mut tools = ToolRegistry::builder()
        .timeout(std::time::Duration::from_millis(settings.defaults.tools.timeout_ms));
    for spec in &settings.defaults.tools.schema {
        tools = tools.tool(Arc::new(DeclaredTool::from_spec(spec.clone())));
    }

    let history = Arc::new(
        JsonlHistorySink::open(&settings.history_path)
            .await
            .map_err(|e| {
                ServerError::Session(format!("history sink open failed: {e}"))
            })?,
    );

    let state = AppState {
        registry: Arc::new(registry),
        config_repo: Arc::new(StaticConfigRepository::new(settings.defaults.clone())?),
        history,
        tools: Arc::new(tools.build()),
        sessions: Arc::new(SessionManager::new(settings.server.max_sessions)),
        settings: Arc::new(settings),
    };

    let addr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "voice orchestrator listening");

    let sessions = state.sessions.clone();
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            sessions.shutdown_all();
        })
        .await?;

    Ok(())
}
