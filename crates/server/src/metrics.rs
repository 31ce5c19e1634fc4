//! Observability metrics
//!
//! Prometheus exposition for the per-call pipeline metrics plus
//! process-level call counters.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::state::AppState;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Must run once at startup before any
/// metric is recorded.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    register_default_metrics();
    METRICS_HANDLE.get_or_init(|| handle.clone());
    handle
}

pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Touch the well-known series so they exist before first use.
fn register_default_metrics() {
    gauge!("voice_orchestrator_calls_active").set(0.0);
    counter!("voice_orchestrator_calls_total").absolute(0);
    gauge!("voice_orchestrator_outbound_queue_depth").set(0.0);
    counter!("voice_orchestrator_fallback_activations_total", "port" => "llm").absolute(0);
    counter!("voice_orchestrator_fallback_activations_total", "port" => "stt").absolute(0);
    counter!("voice_orchestrator_fallback_activations_total", "port" => "tts").absolute(0);
}

pub fn record_call_started() {
    counter!("voice_orchestrator_calls_total").increment(1);
}

pub fn record_active_calls(count: usize) {
    gauge!("voice_orchestrator_calls_active").set(count as f64);
}

/// Prometheus exposition endpoint.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_active_calls(state.sessions.count());

    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}
