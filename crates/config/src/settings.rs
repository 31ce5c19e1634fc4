//! Process-level settings
//!
//! Loaded once at startup from an optional TOML file layered with
//! environment variables. Per-call parameters live in [`ConfigSnapshot`];
//! this covers everything the binary itself needs.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigSnapshot};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    /// Snapshot handed to calls when no external config store is wired
    #[serde(default)]
    pub defaults: ConfigSnapshot,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Path of the append-only call-history file
    #[serde(default = "default_history_path")]
    pub history_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

impl Settings {
    /// Load settings from `path` (optional) layered with `VOICE_ORCH_*`
    /// environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let raw = builder
            .add_source(Environment::with_prefix("VOICE_ORCH").separator("__"))
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        let mut settings: Settings = raw
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        settings.defaults.validate()?;
        Ok(settings)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent call sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_sessions() -> usize {
    256
}
fn default_true() -> bool {
    true
}
fn default_log_filter() -> String {
    "info,voice_orchestrator_pipeline=debug".to_string()
}
fn default_history_path() -> String {
    "./data/history.jsonl".to_string()
}
