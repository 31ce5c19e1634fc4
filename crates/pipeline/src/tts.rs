//! TTS processor
//!
//! Text accumulation and streaming synthesis. Incoming LLM content buffers
//! until a sentence boundary (or a length cap) so the synthesizer gets
//! prosody-sized input, then each sentence streams to the outbound queue as
//! audio. Cancellation is checked between frames; an interrupted sentence
//! stops within one frame of the signal.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voice_orchestrator_config::ConfigSnapshot;
use voice_orchestrator_core::{AudioFrame, PortError, TraceId, TtsPort, TtsRequest};

use crate::outbound::OutboundItem;

/// Force a flush when a sentence run exceeds this many characters.
const MAX_SENTENCE_CHARS: usize = 250;
/// Outbound queue depth at which backpressure starts counting.
const BACKPRESSURE_DEPTH: usize = 3;
/// Sustained depth required before the hint is raised.
const BACKPRESSURE_WINDOW: Duration = Duration::from_millis(200);
/// Hold-audio frame size.
const HOLD_FRAME_MS: u64 = 20;

/// Accumulates streamed text into speakable sentences.
#[derive(Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add streamed text; returns any sentences completed by it.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let mut sentences = Vec::new();

        loop {
            let boundary = self
                .buffer
                .char_indices()
                .find(|&(_, c)| matches!(c, '.' | '?' | '!'))
                .map(|(i, c)| i + c.len_utf8());

            match boundary {
                Some(end) => {
                    let sentence: String = self.buffer.drain(..end).collect();
                    let sentence = sentence.trim().to_string();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                }
                None if self.buffer.chars().count() >= MAX_SENTENCE_CHARS => {
                    let sentence = std::mem::take(&mut self.buffer);
                    sentences.push(sentence.trim().to_string());
                }
                None => break,
            }
        }

        sentences
    }

    /// Remaining buffered text as a final sentence.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Raises the backpressure hint when the outbound queue stays deep.
#[derive(Default)]
struct BackpressureTracker {
    over_since: Mutex<Option<Instant>>,
    hint: AtomicBool,
}

impl BackpressureTracker {
    fn observe(&self, depth: usize) {
        if depth >= BACKPRESSURE_DEPTH {
            let mut over = self.over_since.lock();
            match *over {
                Some(since) => {
                    if since.elapsed() > BACKPRESSURE_WINDOW {
                        if !self.hint.swap(true, Ordering::AcqRel) {
                            tracing::debug!(depth, "outbound backpressure, raising rate hint");
                        }
                    }
                }
                None => *over = Some(Instant::now()),
            }
        } else {
            *self.over_since.lock() = None;
            self.hint.store(false, Ordering::Release);
        }
    }

    fn hint(&self) -> bool {
        self.hint.load(Ordering::Acquire)
    }
}

/// Result of speaking one sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    Completed,
    Cancelled,
}

/// Streams sentences through the TTS port into the outbound queue.
#[derive(Clone)]
pub struct TtsProcessor {
    port: Arc<dyn TtsPort>,
    out_tx: mpsc::Sender<OutboundItem>,
    depth: Arc<AtomicUsize>,
    backpressure: Arc<BackpressureTracker>,
    voice: String,
    language: String,
    speed: f32,
    pitch: f32,
    volume: f32,
    style: Option<String>,
    style_degree: Option<f32>,
    sample_rate: u32,
    inter_sentence_delay: Duration,
}

impl TtsProcessor {
    pub fn new(
        port: Arc<dyn TtsPort>,
        config: &ConfigSnapshot,
        sample_rate: u32,
        out_tx: mpsc::Sender<OutboundItem>,
        depth: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            port,
            out_tx,
            depth,
            backpressure: Arc::new(BackpressureTracker::default()),
            voice: config.tts.voice.clone(),
            language: config.tts.language.clone(),
            speed: config.tts.speed,
            pitch: config.tts.pitch,
            volume: config.tts.volume,
            style: config.tts.style.clone(),
            style_degree: config.tts.style_degree,
            sample_rate,
            inter_sentence_delay: Duration::from_millis(
                config.style.pacing.inter_sentence_delay_ms(),
            ),
        }
    }

    fn request(&self, text: &str) -> TtsRequest {
        TtsRequest {
            text: text.to_string(),
            voice: self.voice.clone(),
            language: self.language.clone(),
            speed: self.speed,
            pitch: self.pitch,
            volume: self.volume,
            style: self.style.clone(),
            style_degree: self.style_degree,
            sample_rate: self.sample_rate,
            backpressure_hint: self.backpressure.hint(),
        }
    }

    /// Whether the rate hint is currently raised (observable for tests).
    pub fn backpressure_hint(&self) -> bool {
        self.backpressure.hint()
    }

    /// Synthesize one sentence and queue its audio. Returns `Cancelled` as
    /// soon as the token fires; the in-flight synthesis stream is dropped,
    /// which aborts it port-side.
    pub async fn speak(
        &self,
        trace_id: TraceId,
        index: usize,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<SpeakOutcome, PortError> {
        if cancel.is_cancelled() {
            return Ok(SpeakOutcome::Cancelled);
        }

        let started = Instant::now();
        let mut stream = self.port.synthesize_stream(self.request(text)).await?;
        let mut first_frame = true;

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(%trace_id, sentence = index, "synthesis cancelled");
                    return Ok(SpeakOutcome::Cancelled);
                }
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(frame)) => {
                    if first_frame {
                        first_frame = false;
                        metrics::histogram!("voice_orchestrator_tts_ttfb_ms")
                            .record(started.elapsed().as_millis() as f64);
                    }
                    self.send_audio(trace_id, frame, cancel).await?;
                }
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }

        if self
            .out_tx
            .send(OutboundItem::SentenceEnd { trace_id, index })
            .await
            .is_err()
        {
            return Ok(SpeakOutcome::Cancelled);
        }

        // Pacing pause between sentences, cancellable
        if !self.inter_sentence_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(SpeakOutcome::Cancelled),
                _ = tokio::time::sleep(self.inter_sentence_delay) => {}
            }
        }

        Ok(SpeakOutcome::Completed)
    }

    async fn send_audio(
        &self,
        trace_id: TraceId,
        frame: AudioFrame,
        cancel: &CancellationToken,
    ) -> Result<(), PortError> {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        self.backpressure.observe(depth);
        metrics::gauge!("voice_orchestrator_outbound_queue_depth").set(depth as f64);

        let item = OutboundItem::Audio { trace_id, frame };
        tokio::select! {
            _ = cancel.cancelled() => {
                self.depth.fetch_sub(1, Ordering::AcqRel);
            }
            sent = self.out_tx.send(item) => {
                if sent.is_err() {
                    self.depth.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
        Ok(())
    }

    /// Loop hold audio into the outbound queue until cancelled. Played
    /// while a slow tool call keeps the turn silent; the configured
    /// background clip is represented as comfort noise frames here.
    pub async fn play_hold_audio(&self, trace_id: TraceId, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(HOLD_FRAME_MS));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let frame = AudioFrame::silence(HOLD_FRAME_MS, self.sample_rate, 1);
                    let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
                    self.backpressure.observe(depth);
                    if self.out_tx.send(OutboundItem::Audio { trace_id, frame }).await.is_err() {
                        self.depth.fetch_sub(1, Ordering::AcqRel);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_orchestrator_providers::builtin::SilenceTts;

    #[test]
    fn test_splitter_sentence_boundaries() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("Le cuento las ").is_empty());
        let sentences = splitter.push("tres opciones. ¿Empezamos? Sí");
        assert_eq!(
            sentences,
            vec!["Le cuento las tres opciones.", "¿Empezamos?"]
        );
        assert_eq!(splitter.flush().as_deref(), Some("Sí"));
        assert_eq!(splitter.flush(), None);
    }

    #[test]
    fn test_splitter_length_cap() {
        let mut splitter = SentenceSplitter::new();
        let long = "palabra ".repeat(40); // 320 chars, no boundary
        let sentences = splitter.push(&long);
        assert_eq!(sentences.len(), 1);
        assert!(sentences[0].chars().count() >= MAX_SENTENCE_CHARS - 10);
    }

    fn processor(out_tx: mpsc::Sender<OutboundItem>, depth: Arc<AtomicUsize>) -> TtsProcessor {
        TtsProcessor::new(
            Arc::new(SilenceTts::new(1.0)),
            &ConfigSnapshot::default(),
            8000,
            out_tx,
            depth,
        )
    }

    #[tokio::test]
    async fn test_speak_queues_audio_and_marker() {
        let (out_tx, mut out_rx) = mpsc::channel(256);
        let depth = Arc::new(AtomicUsize::new(0));
        let tts = processor(out_tx, depth.clone());
        let trace = TraceId::new();

        let outcome = tts
            .speak(trace, 0, "Hola.", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, SpeakOutcome::Completed);

        let mut audio = 0;
        let mut saw_marker = false;
        while let Ok(item) = out_rx.try_recv() {
            match item {
                OutboundItem::Audio { trace_id, .. } => {
                    assert_eq!(trace_id, trace);
                    audio += 1;
                }
                OutboundItem::SentenceEnd { index, .. } => {
                    assert_eq!(index, 0);
                    saw_marker = true;
                }
            }
        }
        assert!(audio > 0);
        assert!(saw_marker);
    }

    #[tokio::test]
    async fn test_speak_cancelled_before_start() {
        let (out_tx, mut out_rx) = mpsc::channel(256);
        let tts = processor(out_tx, Arc::new(AtomicUsize::new(0)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = tts
            .speak(TraceId::new(), 0, "Hola.", &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, SpeakOutcome::Cancelled);
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_hint_raised_when_queue_stays_deep() {
        let tracker = BackpressureTracker::default();
        tracker.observe(5);
        assert!(!tracker.hint());
        tokio::time::advance(Duration::from_millis(250)).await;
        tracker.observe(5);
        assert!(tracker.hint());
        // Queue drains: hint drops
        tracker.observe(0);
        assert!(!tracker.hint());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_audio_until_cancelled() {
        let (out_tx, mut out_rx) = mpsc::channel(256);
        let depth = Arc::new(AtomicUsize::new(0));
        let tts = processor(out_tx, depth);
        let cancel = CancellationToken::new();
        let trace = TraceId::new();

        let player = {
            let tts = tts.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { tts.play_hold_audio(trace, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        player.await.unwrap();

        let mut frames = 0;
        while out_rx.try_recv().is_ok() {
            frames += 1;
        }
        assert!(frames >= 5, "expected several hold frames, got {frames}");
    }
}
