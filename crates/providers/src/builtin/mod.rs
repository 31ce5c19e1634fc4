//! Built-in providers
//!
//! In-process STT/LLM/TTS implementations that keep the full pipeline
//! runnable without vendor credentials: local development, demos, and the
//! scenario tests. Vendor adapters register themselves through the same
//! registry and replace these per configuration.

mod llm;
mod stt;
mod tts;

pub use llm::{ScriptedLlm, ScriptedReply};
pub use stt::ScriptedStt;
pub use tts::SilenceTts;

use std::sync::Arc;

use crate::registry::ProviderRegistry;

/// Register the built-in providers under their well-known names:
/// `loopback` (STT, TTS) and `scripted` (STT, LLM).
pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    registry.register_stt("loopback", |_config| Ok(Arc::new(ScriptedStt::silent())));
    registry.register_llm("scripted", |_config| Ok(Arc::new(ScriptedLlm::echo())));
    registry.register_tts("loopback", |config| {
        Ok(Arc::new(SilenceTts::new(config.tts.speed)))
    });
}
