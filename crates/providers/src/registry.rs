//! Provider registry
//!
//! Process-global map from `(port kind, provider name)` to a factory
//! closure. Populated once at startup; the orchestrator consults it during
//! session construction only, never on the hot path. Adapters are freshly
//! instantiated per call so no vendor session state leaks across calls.

use std::collections::HashMap;
use std::sync::Arc;

use voice_orchestrator_config::ConfigSnapshot;
use voice_orchestrator_core::{LlmPort, PortError, PortKind, SttPort, TtsPort};

type SttFactory =
    Arc<dyn Fn(&ConfigSnapshot) -> Result<Arc<dyn SttPort>, PortError> + Send + Sync>;
type LlmFactory =
    Arc<dyn Fn(&ConfigSnapshot) -> Result<Arc<dyn LlmPort>, PortError> + Send + Sync>;
type TtsFactory =
    Arc<dyn Fn(&ConfigSnapshot) -> Result<Arc<dyn TtsPort>, PortError> + Send + Sync>;

/// Shared, read-only registry handle.
pub type RegistryHandle = Arc<ProviderRegistry>;

/// Factory map for provider adapters.
#[derive(Default)]
pub struct ProviderRegistry {
    stt: HashMap<String, SttFactory>,
    llm: HashMap<String, LlmFactory>,
    tts: HashMap<String, TtsFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_stt<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ConfigSnapshot) -> Result<Arc<dyn SttPort>, PortError> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(provider = %name, "registered STT provider");
        self.stt.insert(name, Arc::new(factory));
    }

    pub fn register_llm<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ConfigSnapshot) -> Result<Arc<dyn LlmPort>, PortError> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(provider = %name, "registered LLM provider");
        self.llm.insert(name, Arc::new(factory));
    }

    pub fn register_tts<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ConfigSnapshot) -> Result<Arc<dyn TtsPort>, PortError> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(provider = %name, "registered TTS provider");
        self.tts.insert(name, Arc::new(factory));
    }

    pub fn create_stt(
        &self,
        name: &str,
        config: &ConfigSnapshot,
    ) -> Result<Arc<dyn SttPort>, PortError> {
        let factory = self.stt.get(name).ok_or_else(|| {
            PortError::unknown_provider(PortKind::Stt, name, &self.available_stt())
        })?;
        tracing::info!(provider = name, "creating STT adapter");
        factory(config)
    }

    pub fn create_llm(
        &self,
        name: &str,
        config: &ConfigSnapshot,
    ) -> Result<Arc<dyn LlmPort>, PortError> {
        let factory = self.llm.get(name).ok_or_else(|| {
            PortError::unknown_provider(PortKind::Llm, name, &self.available_llm())
        })?;
        tracing::info!(provider = name, "creating LLM adapter");
        factory(config)
    }

    pub fn create_tts(
        &self,
        name: &str,
        config: &ConfigSnapshot,
    ) -> Result<Arc<dyn TtsPort>, PortError> {
        let factory = self.tts.get(name).ok_or_else(|| {
            PortError::unknown_provider(PortKind::Tts, name, &self.available_tts())
        })?;
        tracing::info!(provider = name, "creating TTS adapter");
        factory(config)
    }

    pub fn available_stt(&self) -> Vec<String> {
        let mut v: Vec<String> = self.stt.keys().cloned().collect();
        v.sort();
        v
    }

    pub fn available_llm(&self) -> Vec<String> {
        let mut v: Vec<String> = self.llm.keys().cloned().collect();
        v.sort();
        v
    }

    pub fn available_tts(&self) -> Vec<String> {
        let mut v: Vec<String> = self.tts.keys().cloned().collect();
        v.sort();
        v
    }
}
