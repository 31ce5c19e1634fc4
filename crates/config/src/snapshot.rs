//! Immutable per-call configuration snapshot

use serde::{Deserialize, Serialize};
use voice_orchestrator_core::ToolSpec;

use crate::ConfigError;

/// How the session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FirstMessageMode {
    /// Synthesize the configured greeting immediately after connect
    SpeakFirst,
    /// Stay silent until the caller speaks
    #[default]
    Wait,
}

/// Conversational tempo. Rescales the turn-end silence window and the pause
/// inserted between synthesized sentences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    Slow,
    #[default]
    Moderate,
    Fast,
}

impl Pacing {
    /// Turn-end silence window when no explicit override is configured.
    pub fn silence_threshold_ms(&self) -> u64 {
        match self {
            Pacing::Slow => 800,
            Pacing::Moderate => 500,
            Pacing::Fast => 300,
        }
    }

    /// Pause between synthesized sentences.
    pub fn inter_sentence_delay_ms(&self) -> u64 {
        match self {
            Pacing::Slow => 250,
            Pacing::Moderate => 120,
            Pacing::Fast => 40,
        }
    }
}

/// What to do with STT finals that arrive from a session superseded by a
/// barge-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateFinalPolicy {
    /// Suppress them (the user has moved on)
    #[default]
    Drop,
    /// Append them to the new turn's transcript
    Append,
}

/// LLM routing and generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    /// Tried in order when the primary's circuit opens
    #[serde(default)]
    pub fallback_providers: Vec<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub first_message: String,
    #[serde(default)]
    pub first_message_mode: FirstMessageMode,
    /// Messages of history sent per request, system prompt excluded
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Watchdog per streamed chunk
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Response style knobs, appended to the system prompt as directives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StyleSettings {
    #[serde(default)]
    pub response_length: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub formality: Option<String>,
    #[serde(default)]
    pub pacing: Pacing,
}

impl StyleSettings {
    /// Render the configured knobs as a directive block for the system
    /// prompt. Empty when nothing is configured.
    pub fn directives(&self) -> String {
        let mut lines = Vec::new();
        if let Some(len) = &self.response_length {
            lines.push(format!("Keep responses {len}."));
        }
        if let Some(tone) = &self.tone {
            lines.push(format!("Use a {tone} tone."));
        }
        if let Some(formality) = &self.formality {
            lines.push(format!("Address the caller with {formality} formality."));
        }
        if lines.is_empty() {
            String::new()
        } else {
            format!("\n\nStyle:\n{}", lines.join("\n"))
        }
    }
}

/// TTS routing and voice parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    #[serde(default = "default_tts_provider")]
    pub provider: String,
    #[serde(default)]
    pub fallback_providers: Vec<String>,
    #[serde(default)]
    pub voice: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub pitch: f32,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub style_degree: Option<f32>,
}

impl Default for TtsSettings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// STT routing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSettings {
    #[serde(default = "default_stt_provider")]
    pub provider: String,
    #[serde(default)]
    pub fallback_providers: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub late_final_policy: LateFinalPolicy,
}

impl Default for SttSettings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Voice activity detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    /// Frame-level voiced threshold, valid range 0.1–0.9
    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,
    /// Turn-end silence window; overrides the pacing mapping when set
    #[serde(default)]
    pub silence_threshold_ms: Option<u64>,
    /// Consecutive voiced duration required before declaring speech start
    #[serde(default = "default_confirmation_window_ms")]
    pub confirmation_window_ms: u64,
}

impl Default for VadSettings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Barge-in gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Recognized words required before an interrupt is honored
    #[serde(default = "default_min_words")]
    pub min_words: usize,
}

impl Default for InterruptionSettings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Session lifecycle parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Silence (measured from the last user audio) before prompting
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_idle_message")]
    pub idle_message: String,
    /// Idle prompts played before the call is ended
    #[serde(default = "default_inactivity_max_retries")]
    pub inactivity_max_retries: u32,
    /// Hard cap on call duration
    #[serde(default = "default_max_duration_s")]
    pub max_duration_s: u64,
    /// Spoken before hanging up on a fatal error, if TTS is still alive
    #[serde(default)]
    pub fallback_utterance: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Tools exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsSettings {
    #[serde(default)]
    pub schema: Vec<ToolSpec>,
    #[serde(default = "default_tool_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ToolsSettings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Immutable copy of the user-configurable parameters, taken at session
/// start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub style: StyleSettings,
    #[serde(default)]
    pub tts: TtsSettings,
    #[serde(default)]
    pub stt: SttSettings,
    #[serde(default)]
    pub vad: VadSettings,
    #[serde(default)]
    pub interruption: InterruptionSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub tools: ToolsSettings,
    /// STT finals matching any of these phrases are dropped
    #[serde(default)]
    pub hallucination_blacklist: Vec<String>,
    /// Named hold-audio clip played while slow tools run
    #[serde(default)]
    pub background_sound: Option<String>,
}

impl ConfigSnapshot {
    /// Validate ranges. Out-of-range values that have a safe interpretation
    /// are clamped with a warning; contradictions are errors.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if !(0.1..=0.9).contains(&self.vad.threshold) {
            let clamped = self.vad.threshold.clamp(0.1, 0.9);
            tracing::warn!(
                configured = self.vad.threshold,
                clamped,
                "vad.threshold outside 0.1-0.9, clamping"
            );
            self.vad.threshold = clamped;
        }
        if !(0.5..=2.0).contains(&self.tts.speed) {
            return Err(ConfigError::InvalidValue {
                field: "tts.speed".to_string(),
                message: format!("{} outside 0.5-2.0", self.tts.speed),
            });
        }
        if self.session.max_duration_s == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.max_duration_s".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.llm.context_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.context_window".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Turn-end silence window: explicit override, else the pacing mapping.
    pub fn silence_threshold_ms(&self) -> u64 {
        self.vad
            .silence_threshold_ms
            .unwrap_or_else(|| self.style.pacing.silence_threshold_ms())
    }

    /// System prompt with the style directive block appended.
    pub fn effective_system_prompt(&self) -> String {
        format!("{}{}", self.llm.system_prompt, self.style.directives())
    }
}

fn default_llm_provider() -> String {
    "scripted".to_string()
}
fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    600
}
fn default_context_window() -> usize {
    20
}
fn default_chunk_timeout_ms() -> u64 {
    10_000
}
fn default_tts_provider() -> String {
    "loopback".to_string()
}
fn default_stt_provider() -> String {
    "loopback".to_string()
}
fn default_language() -> String {
    "es-MX".to_string()
}
fn default_speed() -> f32 {
    1.0
}
fn default_volume() -> f32 {
    100.0
}
fn default_vad_threshold() -> f32 {
    0.5
}
fn default_confirmation_window_ms() -> u64 {
    200
}
fn default_true() -> bool {
    true
}
fn default_min_words() -> usize {
    0
}
fn default_idle_timeout_ms() -> u64 {
    5_000
}
fn default_idle_message() -> String {
    "¿Sigue ahí?".to_string()
}
fn default_inactivity_max_retries() -> u32 {
    2
}
fn default_max_duration_s() -> u64 {
    600
}
fn default_tool_timeout_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let snapshot = ConfigSnapshot::default();
        assert_eq!(snapshot.vad.threshold, 0.5);
        assert_eq!(snapshot.silence_threshold_ms(), 500);
        assert_eq!(snapshot.session.idle_timeout_ms, 5_000);
        assert_eq!(snapshot.session.max_duration_s, 600);
        assert_eq!(snapshot.tools.timeout_ms, 10_000);
    }

    #[test]
    fn test_pacing_rescales_silence() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.style.pacing = Pacing::Fast;
        assert_eq!(snapshot.silence_threshold_ms(), 300);
        // Explicit value wins over the mapping
        snapshot.vad.silence_threshold_ms = Some(650);
        assert_eq!(snapshot.silence_threshold_ms(), 650);
    }

    #[test]
    fn test_threshold_clamped() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.vad.threshold = 0.95;
        snapshot.validate().unwrap();
        assert_eq!(snapshot.vad.threshold, 0.9);
    }

    #[test]
    fn test_invalid_speed_rejected() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.tts.speed = 3.0;
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_style_directives() {
        let mut style = StyleSettings::default();
        assert_eq!(style.directives(), "");
        style.tone = Some("warm".to_string());
        style.response_length = Some("brief".to_string());
        let d = style.directives();
        assert!(d.contains("warm"));
        assert!(d.contains("brief"));
    }

    #[test]
    fn test_snapshot_deserializes_from_partial_json() {
        let snapshot: ConfigSnapshot = serde_json::from_str(
            r#"{"llm": {"model": "gpt-4o-mini"}, "style": {"pacing": "slow"}}"#,
        )
        .unwrap();
        assert_eq!(snapshot.llm.model, "gpt-4o-mini");
        assert_eq!(snapshot.silence_threshold_ms(), 800);
        assert_eq!(snapshot.llm.temperature, 0.7);
    }
}
