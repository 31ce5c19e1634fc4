//! Call server
//!
//! Hosts the WebSocket media endpoint, one orchestrator per connected call,
//! plus health and Prometheus metrics endpoints. The HTTP control plane for
//! editing configurations lives elsewhere; this process only reads
//! snapshots.

pub mod http;
pub mod metrics;
pub mod session;
pub mod state;
pub mod websocket;

pub use session::{CallHandle, SessionManager};
pub use state::AppState;

use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tower_http::cors::CorsLayer;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Bind error: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] voice_orchestrator_config::ConfigError),
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors_enabled = state.settings.server.cors_enabled;
    let mut router = Router::new()
        .route("/health", get(http::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/ws/call", get(websocket::handle))
        .with_state(state);

    if cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }
    router
}
