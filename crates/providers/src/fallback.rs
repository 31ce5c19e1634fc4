//! Fallback wrappers
//!
//! Each wrapper implements its port by delegating to an ordered list of
//! underlying providers (primary first). Selection skips providers whose
//! breaker is open. Failover is transparent only while nothing has been
//! yielded to the caller: once a stream is handed out, mid-stream errors
//! surface as-is (no hot swap) and are only recorded against the breaker.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use voice_orchestrator_config::ConfigSnapshot;
use voice_orchestrator_core::{
    AudioFrame, AudioFrameStream, LlmChunkStream, LlmPort, LlmRequest, PortError, PortKind,
    SttPort, TextFrameStream, TtsPort, TtsRequest,
};

use crate::breaker::CircuitBreaker;
use crate::registry::ProviderRegistry;

struct Slot<P: ?Sized> {
    name: String,
    port: Arc<P>,
    breaker: Arc<CircuitBreaker>,
}

impl<P: ?Sized> Slot<P> {
    fn new(name: String, port: Arc<P>) -> Self {
        Self {
            name,
            port,
            breaker: Arc::new(CircuitBreaker::default()),
        }
    }
}

fn record_failure(breaker: &CircuitBreaker, err: &PortError) {
    if err.retryable {
        breaker.on_failure();
    } else {
        breaker.force_open();
    }
}

/// Wrap a stream so errors observed mid-flight are charged to the breaker
/// that produced the stream.
fn account_stream<T: Send + 'static>(
    stream: BoxStream<'static, Result<T, PortError>>,
    breaker: Arc<CircuitBreaker>,
) -> BoxStream<'static, Result<T, PortError>> {
    stream
        .map(move |item| {
            if let Err(err) = &item {
                record_failure(&breaker, err);
            }
            item
        })
        .boxed()
}

macro_rules! select_slot {
    ($slots:expr, $port_kind:expr, $attempt:expr) => {{
        let mut last_err: Option<PortError> = None;
        let mut activated_fallback = false;
        for slot in $slots.iter() {
            if !slot.breaker.allow() {
                tracing::debug!(provider = %slot.name, "skipping provider, circuit open");
                activated_fallback = true;
                continue;
            }
            match $attempt(slot).await {
                Ok(stream) => {
                    slot.breaker.on_success();
                    if activated_fallback {
                        metrics::counter!(
                            "voice_orchestrator_fallback_activations_total",
                            "port" => $port_kind.as_str()
                        )
                        .increment(1);
                        tracing::info!(provider = %slot.name, "fallback provider selected");
                    }
                    return Ok(account_stream(stream, slot.breaker.clone()));
                }
                Err(err) => {
                    tracing::warn!(provider = %slot.name, error = %err, "provider call failed");
                    record_failure(&slot.breaker, &err);
                    activated_fallback = true;
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            PortError::fatal($port_kind, "no provider available (all circuits open)")
        }))
    }};
}

/// STT port backed by an ordered provider list.
pub struct FallbackStt {
    slots: Vec<Slot<dyn SttPort>>,
}

impl FallbackStt {
    pub fn new(providers: Vec<(String, Arc<dyn SttPort>)>) -> Self {
        Self {
            slots: providers
                .into_iter()
                .map(|(name, port)| Slot::new(name, port))
                .collect(),
        }
    }

    /// Build the chain named by `config.stt`: primary plus fallbacks.
    pub fn from_registry(
        registry: &ProviderRegistry,
        config: &ConfigSnapshot,
    ) -> Result<Self, PortError> {
        let mut providers = Vec::new();
        for name in std::iter::once(&config.stt.provider).chain(&config.stt.fallback_providers) {
            providers.push((name.clone(), registry.create_stt(name, config)?));
        }
        Ok(Self::new(providers))
    }
}

#[async_trait]
impl SttPort for FallbackStt {
    async fn transcribe_stream(
        &self,
        audio: BoxStream<'static, AudioFrame>,
    ) -> Result<TextFrameStream, PortError> {
        // The audio stream can only be consumed once, so failover is
        // restricted to providers that reject the session before reading it.
        let mut audio = Some(audio);
        let mut last_err: Option<PortError> = None;
        let mut activated_fallback = false;
        for slot in self.slots.iter() {
            if !slot.breaker.allow() {
                activated_fallback = true;
                continue;
            }
            let Some(input) = audio.take() else { break };
            match slot.port.transcribe_stream(input).await {
                Ok(stream) => {
                    slot.breaker.on_success();
                    if activated_fallback {
                        metrics::counter!(
                            "voice_orchestrator_fallback_activations_total",
                            "port" => PortKind::Stt.as_str()
                        )
                        .increment(1);
                    }
                    return Ok(account_stream(stream, slot.breaker.clone()));
                }
                Err(err) => {
                    tracing::warn!(provider = %slot.name, error = %err, "STT session open failed");
                    record_failure(&slot.breaker, &err);
                    last_err = Some(err);
                    break;
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| PortError::fatal(PortKind::Stt, "no STT provider available")))
    }
}

/// LLM port backed by an ordered provider list.
pub struct FallbackLlm {
    slots: Vec<Slot<dyn LlmPort>>,
}

impl FallbackLlm {
    pub fn new(providers: Vec<(String, Arc<dyn LlmPort>)>) -> Self {
        Self {
            slots: providers
                .into_iter()
                .map(|(name, port)| Slot::new(name, port))
                .collect(),
        }
    }

    pub fn from_registry(
        registry: &ProviderRegistry,
        config: &ConfigSnapshot,
    ) -> Result<Self, PortError> {
        let mut providers = Vec::new();
        for name in std::iter::once(&config.llm.provider).chain(&config.llm.fallback_providers) {
            providers.push((name.clone(), registry.create_llm(name, config)?));
        }
        Ok(Self::new(providers))
    }
}

#[async_trait]
impl LlmPort for FallbackLlm {
    async fn generate_stream(&self, request: LlmRequest) -> Result<LlmChunkStream, PortError> {
        select_slot!(self.slots, PortKind::Llm, |slot: &Slot<dyn LlmPort>| {
            slot.port.generate_stream(request.clone())
        })
    }
}

/// TTS port backed by an ordered provider list.
pub struct FallbackTts {
    slots: Vec<Slot<dyn TtsPort>>,
}

impl FallbackTts {
    pub fn new(providers: Vec<(String, Arc<dyn TtsPort>)>) -> Self {
        Self {
            slots: providers
                .into_iter()
                .map(|(name, port)| Slot::new(name, port))
                .collect(),
        }
    }

    pub fn from_registry(
        registry: &ProviderRegistry,
        config: &ConfigSnapshot,
    ) -> Result<Self, PortError> {
        let mut providers = Vec::new();
        for name in std::iter::once(&config.tts.provider).chain(&config.tts.fallback_providers) {
            providers.push((name.clone(), registry.create_tts(name, config)?));
        }
        Ok(Self::new(providers))
    }
}

#[async_trait]
impl TtsPort for FallbackTts {
    async fn synthesize_stream(&self, request: TtsRequest) -> Result<AudioFrameStream, PortError> {
        select_slot!(self.slots, PortKind::Tts, |slot: &Slot<dyn TtsPort>| {
            slot.port.synthesize_stream(request.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use voice_orchestrator_core::{FinishReason, LlmChunk};

    /// LLM that fails `failures` times, then streams a fixed reply.
    struct FlakyLlm {
        calls: AtomicU32,
        failures: u32,
        retryable: bool,
    }

    impl FlakyLlm {
        fn new(failures: u32, retryable: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                retryable,
            }
        }
    }

    #[async_trait]
    impl LlmPort for FlakyLlm {
        async fn generate_stream(&self, _request: LlmRequest) -> Result<LlmChunkStream, PortError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(if self.retryable {
                    PortError::transient(PortKind::Llm, "503 service unavailable")
                } else {
                    PortError::fatal(PortKind::Llm, "401 unauthorized")
                });
            }
            Ok(futures::stream::iter(vec![
                Ok(LlmChunk::content("ok")),
                Ok(LlmChunk::finish(FinishReason::Stop)),
            ])
            .boxed())
        }
    }

    struct HealthyLlm;

    #[async_trait]
    impl LlmPort for HealthyLlm {
        async fn generate_stream(&self, _request: LlmRequest) -> Result<LlmChunkStream, PortError> {
            Ok(futures::stream::iter(vec![
                Ok(LlmChunk::content("secondary")),
                Ok(LlmChunk::finish(FinishReason::Stop)),
            ])
            .boxed())
        }
    }

    async fn collect_content(mut stream: LlmChunkStream) -> String {
        let mut out = String::new();
        while let Some(Ok(chunk)) = stream.next().await {
            if let Some(c) = chunk.content {
                out.push_str(&c);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_transparent_failover_on_transient_error() {
        let primary = Arc::new(FlakyLlm::new(u32::MAX, true));
        let wrapper = FallbackLlm::new(vec![
            ("primary".to_string(), primary.clone() as Arc<dyn LlmPort>),
            ("secondary".to_string(), Arc::new(HealthyLlm)),
        ]);

        let stream = wrapper.generate_stream(LlmRequest::default()).await.unwrap();
        assert_eq!(collect_content(stream).await, "secondary");
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_three_failures() {
        let primary = Arc::new(FlakyLlm::new(u32::MAX, true));
        let wrapper = FallbackLlm::new(vec![
            ("primary".to_string(), primary.clone() as Arc<dyn LlmPort>),
            ("secondary".to_string(), Arc::new(HealthyLlm)),
        ]);

        for _ in 0..3 {
            let _ = wrapper.generate_stream(LlmRequest::default()).await;
        }
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);

        // Fourth request routes straight to secondary without touching primary
        let stream = wrapper.generate_stream(LlmRequest::default()).await.unwrap();
        assert_eq!(collect_content(stream).await, "secondary");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_opens_immediately() {
        let primary = Arc::new(FlakyLlm::new(u32::MAX, false));
        let wrapper = FallbackLlm::new(vec![
            ("primary".to_string(), primary.clone() as Arc<dyn LlmPort>),
            ("secondary".to_string(), Arc::new(HealthyLlm)),
        ]);

        let _ = wrapper.generate_stream(LlmRequest::default()).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);

        let _ = wrapper.generate_stream(LlmRequest::default()).await.unwrap();
        // Circuit already open: primary not retried
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_providers_down() {
        let wrapper = FallbackLlm::new(vec![(
            "primary".to_string(),
            Arc::new(FlakyLlm::new(u32::MAX, true)) as Arc<dyn LlmPort>,
        )]);
        let err = wrapper.generate_stream(LlmRequest::default()).await.unwrap_err();
        assert!(err.retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_recovers_after_cooldown() {
        let primary = Arc::new(FlakyLlm::new(3, true));
        let wrapper = FallbackLlm::new(vec![
            ("primary".to_string(), primary.clone() as Arc<dyn LlmPort>),
            ("secondary".to_string(), Arc::new(HealthyLlm)),
        ]);

        for _ in 0..3 {
            let _ = wrapper.generate_stream(LlmRequest::default()).await;
        }
        tokio::time::advance(std::time::Duration::from_secs(61)).await;

        // Half-open trial goes to primary, which now succeeds
        let stream = wrapper.generate_stream(LlmRequest::default()).await.unwrap();
        assert_eq!(collect_content(stream).await, "ok");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 4);
    }
}
