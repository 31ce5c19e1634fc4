//! Call configuration
//!
//! A [`ConfigSnapshot`] is an immutable copy of the user-tunable parameters
//! taken once at session start; the orchestrator reads only from its
//! snapshot, so runtime configuration edits affect subsequent calls only.
//! The [`ConfigRepository`] port abstracts where snapshots come from.

mod repository;
mod settings;
mod snapshot;

pub use repository::{ConfigRepository, StaticConfigRepository};
pub use settings::{ObservabilityConfig, ServerConfig, Settings};
pub use snapshot::{
    ConfigSnapshot, FirstMessageMode, InterruptionSettings, LateFinalPolicy, LlmSettings, Pacing,
    SessionSettings, SttSettings, StyleSettings, ToolsSettings, TtsSettings, VadSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("No configuration for call: {0}")]
    NotFound(String),
}
