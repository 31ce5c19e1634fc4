//! Outbound writer
//!
//! Single consumer of the TTS→transport queue. Drops frames whose trace is
//! no longer live (barge-in leaves stragglers behind), keeps the
//! queue-depth gauge honest, tells the engine when the first audio frame of
//! a turn actually went out, and accounts spoken sentences so an
//! interrupted turn commits exactly what the caller heard.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use voice_orchestrator_core::{AudioFrame, TraceId};
use voice_orchestrator_transport::MediaSink;

/// Items flowing from the TTS processor to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundItem {
    Audio {
        trace_id: TraceId,
        frame: AudioFrame,
    },
    /// All audio of sentence `index` has been queued before this marker
    SentenceEnd {
        trace_id: TraceId,
        index: usize,
    },
}

/// Notifications from the writer back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundEvent {
    /// First audio frame of this trace reached the transport
    FirstAudio { trace_id: TraceId },
    SentenceSpoken { trace_id: TraceId, index: usize },
}

/// Sentences fully emitted to the transport, per live trace.
#[derive(Default)]
pub struct SpokenTracker {
    inner: Mutex<(Option<TraceId>, usize)>,
}

impl SpokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, trace_id: TraceId) {
        *self.inner.lock() = (Some(trace_id), 0);
    }

    fn record(&self, trace_id: TraceId, index: usize) {
        let mut inner = self.inner.lock();
        if inner.0 == Some(trace_id) {
            inner.1 = inner.1.max(index + 1);
        }
    }

    /// Sentences fully spoken for `trace_id` (0 if it is not the live turn).
    pub fn spoken(&self, trace_id: TraceId) -> usize {
        let inner = self.inner.lock();
        if inner.0 == Some(trace_id) {
            inner.1
        } else {
            0
        }
    }
}

pub struct OutboundWriter {
    rx: mpsc::Receiver<OutboundItem>,
    /// Traces to drain from the queue (barge-in)
    interrupt_rx: mpsc::Receiver<TraceId>,
    sink: Arc<dyn MediaSink>,
    depth: Arc<AtomicUsize>,
    live_trace: watch::Receiver<TraceId>,
    events: mpsc::Sender<OutboundEvent>,
    spoken: Arc<SpokenTracker>,
}

impl OutboundWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: mpsc::Receiver<OutboundItem>,
        interrupt_rx: mpsc::Receiver<TraceId>,
        sink: Arc<dyn MediaSink>,
        depth: Arc<AtomicUsize>,
        live_trace: watch::Receiver<TraceId>,
        events: mpsc::Sender<OutboundEvent>,
        spoken: Arc<SpokenTracker>,
    ) -> Self {
        Self {
            rx,
            interrupt_rx,
            sink,
            depth,
            live_trace,
            events,
            spoken,
        }
    }

    /// Run until the queue closes. Interrupt requests are served before
    /// queued audio.
    pub async fn run(mut self) {
        let mut audio_started: Option<TraceId> = None;

        loop {
            tokio::select! {
                biased;
                interrupted = self.interrupt_rx.recv() => {
                    let Some(trace_id) = interrupted else { break };
                    self.drain(trace_id);
                    if let Err(e) = self.sink.send_clear().await {
                        tracing::warn!(error = %e, "clear failed");
                    }
                    tracing::debug!(%trace_id, "outbound queue drained after interrupt");
                }
                item = self.rx.recv() => {
                    let Some(item) = item else { break };
                    self.handle(item, &mut audio_started).await;
                }
            }
        }
    }

    async fn handle(&mut self, item: OutboundItem, audio_started: &mut Option<TraceId>) {
        match item {
            OutboundItem::Audio { trace_id, frame } => {
                let depth = self.depth.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
                metrics::gauge!("voice_orchestrator_outbound_queue_depth").set(depth as f64);

                if trace_id != *self.live_trace.borrow() {
                    tracing::trace!(%trace_id, "dropping stale outbound audio");
                    return;
                }
                if let Err(e) = self.sink.send_audio(&frame).await {
                    tracing::warn!(error = %e, "outbound audio send failed");
                    return;
                }
                if *audio_started != Some(trace_id) {
                    *audio_started = Some(trace_id);
                    let _ = self
                        .events
                        .send(OutboundEvent::FirstAudio { trace_id })
                        .await;
                }
            }
            OutboundItem::SentenceEnd { trace_id, index } => {
                if trace_id != *self.live_trace.borrow() {
                    return;
                }
                self.spoken.record(trace_id, index);
                if let Err(e) = self.sink.send_mark(&format!("s{index}")).await {
                    tracing::debug!(error = %e, "mark send failed");
                }
                let _ = self
                    .events
                    .send(OutboundEvent::SentenceSpoken { trace_id, index })
                    .await;
            }
        }
    }

    /// Drop everything queued for `trace_id` without sending it.
    fn drain(&mut self, trace_id: TraceId) {
        while let Ok(item) = self.rx.try_recv() {
            match item {
                OutboundItem::Audio { trace_id: t, .. } => {
                    self.depth.fetch_sub(1, Ordering::AcqRel);
                    if t != trace_id {
                        tracing::trace!("drained audio frame of another trace");
                    }
                }
                OutboundItem::SentenceEnd { trace_id: t, index } if t != trace_id => {
                    self.spoken.record(t, index);
                }
                OutboundItem::SentenceEnd { .. } => {}
            }
        }
        metrics::gauge!("voice_orchestrator_outbound_queue_depth").set(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use voice_orchestrator_transport::TransportError;

    #[derive(Default)]
    struct RecordingSink {
        audio: Mutex<Vec<AudioFrame>>,
        marks: Mutex<Vec<String>>,
        clears: AtomicUsize,
    }

    #[async_trait]
    impl MediaSink for RecordingSink {
        async fn send_audio(&self, frame: &AudioFrame) -> Result<(), TransportError> {
            self.audio.lock().push(frame.clone());
            Ok(())
        }
        async fn send_mark(&self, name: &str) -> Result<(), TransportError> {
            self.marks.lock().push(name.to_string());
            Ok(())
        }
        async fn send_clear(&self) -> Result<(), TransportError> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct Fixture {
        out_tx: mpsc::Sender<OutboundItem>,
        interrupt_tx: mpsc::Sender<TraceId>,
        live_tx: watch::Sender<TraceId>,
        events_rx: mpsc::Receiver<OutboundEvent>,
        sink: Arc<RecordingSink>,
        depth: Arc<AtomicUsize>,
        spoken: Arc<SpokenTracker>,
        writer: tokio::task::JoinHandle<()>,
    }

    fn fixture(live: TraceId) -> Fixture {
        let (out_tx, out_rx) = mpsc::channel(32);
        let (interrupt_tx, interrupt_rx) = mpsc::channel(4);
        let (live_tx, live_rx) = watch::channel(live);
        let (events_tx, events_rx) = mpsc::channel(32);
        let sink = Arc::new(RecordingSink::default());
        let depth = Arc::new(AtomicUsize::new(0));
        let spoken = Arc::new(SpokenTracker::new());
        spoken.begin(live);

        let writer = OutboundWriter::new(
            out_rx,
            interrupt_rx,
            sink.clone(),
            depth.clone(),
            live_rx,
            events_tx,
            spoken.clone(),
        );
        let writer = tokio::spawn(writer.run());

        Fixture {
            out_tx,
            interrupt_tx,
            live_tx,
            events_rx,
            sink,
            depth,
            spoken,
            writer,
        }
    }

    fn frame() -> AudioFrame {
        AudioFrame::silence(20, 8000, 1)
    }

    #[tokio::test]
    async fn test_audio_forwarded_with_first_audio_event() {
        let trace = TraceId::new();
        let mut fx = fixture(trace);

        for _ in 0..3 {
            fx.depth.fetch_add(1, Ordering::AcqRel);
            fx.out_tx
                .send(OutboundItem::Audio {
                    trace_id: trace,
                    frame: frame(),
                })
                .await
                .unwrap();
        }
        let event = fx.events_rx.recv().await.unwrap();
        assert_eq!(event, OutboundEvent::FirstAudio { trace_id: trace });

        drop(fx.out_tx);
        drop(fx.interrupt_tx);
        fx.writer.await.unwrap();
        assert_eq!(fx.sink.audio.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_stale_trace_dropped() {
        let live = TraceId::new();
        let stale = TraceId::new();
        let fx = fixture(live);

        fx.depth.fetch_add(1, Ordering::AcqRel);
        fx.out_tx
            .send(OutboundItem::Audio {
                trace_id: stale,
                frame: frame(),
            })
            .await
            .unwrap();

        drop(fx.out_tx);
        drop(fx.interrupt_tx);
        fx.writer.await.unwrap();
        assert!(fx.sink.audio.lock().is_empty());
        let _ = fx.live_tx;
    }

    #[tokio::test]
    async fn test_sentence_accounting() {
        let trace = TraceId::new();
        let fx = fixture(trace);

        fx.out_tx
            .send(OutboundItem::SentenceEnd {
                trace_id: trace,
                index: 0,
            })
            .await
            .unwrap();
        fx.out_tx
            .send(OutboundItem::SentenceEnd {
                trace_id: trace,
                index: 1,
            })
            .await
            .unwrap();

        drop(fx.out_tx);
        drop(fx.interrupt_tx);
        fx.writer.await.unwrap();
        assert_eq!(fx.spoken.spoken(trace), 2);
        assert_eq!(fx.sink.marks.lock().as_slice(), &["s0", "s1"]);
    }

    #[tokio::test]
    async fn test_interrupt_drains_and_clears() {
        let trace = TraceId::new();
        let fx = fixture(trace);

        // Queue audio the writer has not consumed yet, then interrupt first
        // (biased select serves the interrupt before the queue)
        for _ in 0..5 {
            fx.depth.fetch_add(1, Ordering::AcqRel);
            fx.out_tx
                .send(OutboundItem::Audio {
                    trace_id: trace,
                    frame: frame(),
                })
                .await
                .unwrap();
        }
        fx.interrupt_tx.send(trace).await.unwrap();

        drop(fx.out_tx);
        drop(fx.interrupt_tx);
        fx.writer.await.unwrap();
        assert_eq!(fx.sink.clears.load(Ordering::SeqCst), 1);
        assert_eq!(fx.depth.load(Ordering::SeqCst), 0);
        // Nothing (or close to nothing) was spoken after the interrupt
        assert!(fx.sink.audio.lock().len() <= 1);
    }
}
