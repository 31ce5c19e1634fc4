//! Shared application state

use std::sync::Arc;

use voice_orchestrator_config::{ConfigRepository, Settings};
use voice_orchestrator_persistence::HistorySink;
use voice_orchestrator_providers::RegistryHandle;
use voice_orchestrator_tools::ToolRegistry;

use crate::session::SessionManager;

/// State shared across handlers. Everything here is read-only after startup
/// except the session map.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: RegistryHandle,
    pub config_repo: Arc<dyn ConfigRepository>,
    pub history: Arc<dyn HistorySink>,
    pub tools: Arc<ToolRegistry>,
    pub sessions: Arc<SessionManager>,
}
