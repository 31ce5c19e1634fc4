//! Plain HTTP endpoints

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    active_calls: usize,
    stt_providers: Vec<String>,
    llm_providers: Vec<String>,
    tts_providers: Vec<String>,
}

/// Liveness plus a summary of what this process can route to.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_calls: state.sessions.count(),
        stt_providers: state.registry.available_stt(),
        llm_providers: state.registry.available_llm(),
        tts_providers: state.registry.available_tts(),
    })
}
