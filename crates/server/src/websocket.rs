//! WebSocket call endpoint
//!
//! Carrier or browser connects, sends a `start` envelope declaring the
//! media format, then streams base64 PCM media envelopes. One orchestrator
//! runs per socket; outbound audio, marks, and clears travel back on the
//! same socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use voice_orchestrator_core::{AudioFrame, ToolPort};
use voice_orchestrator_pipeline::Orchestrator;
use voice_orchestrator_transport::{
    InboundEnvelope, MediaEvent, MediaSink, MediaSource, OutboundEnvelope, Resampler, StartMeta,
    TransportError,
};

use crate::state::AppState;

/// How long the carrier has to send its start envelope.
const START_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn handle(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();

    let Some(start) = await_start(&mut receiver).await else {
        tracing::warn!("socket closed before start envelope");
        return;
    };

    let call_id = if start.call_sid.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        start.call_sid.clone()
    };
    let sample_rate = start.media_format.sample_rate;
    let channels = start.media_format.channels.max(1);

    tracing::info!(
        %call_id,
        stream = %start.stream_sid,
        sample_rate,
        "call connected"
    );

    let snapshot = match state.config_repo.load(&call_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(%call_id, error = %e, "config load failed");
            return;
        }
    };

    let orchestrator = match Orchestrator::from_registry(
        call_id.clone(),
        snapshot,
        sample_rate,
        &state.registry,
        state.tools.clone() as Arc<dyn ToolPort>,
        state.history.clone(),
    ) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(%call_id, error = %e, "orchestrator construction failed");
            return;
        }
    };

    let handle = match state.sessions.register(
        &call_id,
        orchestrator.control(),
        orchestrator.cancellation_token(),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(%call_id, error = %e, "call rejected");
            return;
        }
    };
    crate::metrics::record_call_started();

    // Inbound pump: socket -> media events
    let (media_tx, media_rx) = mpsc::channel::<MediaEvent>(64);
    let inbound = {
        let call_id = call_id.clone();
        tokio::spawn(async move {
            while let Some(Ok(message)) = receiver.next().await {
                match message {
                    Message::Text(text) => match InboundEnvelope::decode(&text) {
                        Ok(envelope) => match envelope {
                            InboundEnvelope::Stop => {
                                let _ = media_tx.send(MediaEvent::Stop).await;
                                break;
                            }
                            InboundEnvelope::Start { .. } => {
                                tracing::debug!(%call_id, "duplicate start envelope ignored");
                            }
                            other => match other.media_pcm() {
                                Ok(Some((pcm, _track))) => {
                                    let frame = AudioFrame::new(pcm, sample_rate, channels);
                                    if media_tx.send(MediaEvent::Audio(frame)).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    tracing::warn!(%call_id, error = %e, "bad media payload");
                                }
                            },
                        },
                        Err(e) => {
                            tracing::warn!(%call_id, error = %e, "malformed envelope");
                        }
                    },
                    Message::Close(_) => {
                        let _ = media_tx.send(MediaEvent::Stop).await;
                        break;
                    }
                    _ => {}
                }
            }
        })
    };

    let source = Box::new(ChannelMediaSource { rx: media_rx });
    let sink = Arc::new(WsMediaSink::new(sender, sample_rate));

    if let Err(e) = orchestrator.run(source, sink).await {
        tracing::error!(%call_id, error = %e, "call ended with error");
    }

    inbound.abort();
    state.sessions.remove(&handle.call_id);
}

async fn await_start(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
) -> Option<StartMeta> {
    let deadline = tokio::time::sleep(START_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return None,
            message = receiver.next() => {
                match message? {
                    Ok(Message::Text(text)) => match InboundEnvelope::decode(&text) {
                        Ok(InboundEnvelope::Start { start }) => return Some(start),
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "malformed envelope before start");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => continue,
                    Err(_) => return None,
                }
            }
        }
    }
}

struct ChannelMediaSource {
    rx: mpsc::Receiver<MediaEvent>,
}

#[async_trait]
impl MediaSource for ChannelMediaSource {
    async fn next_event(&mut self) -> Option<MediaEvent> {
        self.rx.recv().await
    }
}

/// Outbound side of the socket as a media sink. Frames not already at the
/// carrier rate are resampled before encoding.
struct WsMediaSink {
    sender: tokio::sync::Mutex<SplitSink<WebSocket, Message>>,
    carrier_rate: u32,
}

impl WsMediaSink {
    fn new(sender: SplitSink<WebSocket, Message>, carrier_rate: u32) -> Self {
        Self {
            sender: tokio::sync::Mutex::new(sender),
            carrier_rate,
        }
    }

    async fn send_envelope(&self, envelope: OutboundEnvelope) -> Result<(), TransportError> {
        let text = envelope.encode()?;
        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl MediaSink for WsMediaSink {
    async fn send_audio(&self, frame: &AudioFrame) -> Result<(), TransportError> {
        let pcm = if frame.sample_rate == self.carrier_rate {
            frame.pcm.clone()
        } else {
            Resampler::new(frame.sample_rate, self.carrier_rate)?.resample_bytes(&frame.pcm)
        };
        self.send_envelope(OutboundEnvelope::media(&pcm)).await
    }

    async fn send_mark(&self, name: &str) -> Result<(), TransportError> {
        self.send_envelope(OutboundEnvelope::mark(name)).await
    }

    async fn send_clear(&self) -> Result<(), TransportError> {
        self.send_envelope(OutboundEnvelope::Clear).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sender = self.sender.lock().await;
        let _ = sender.send(Message::Close(None)).await;
        Ok(())
    }
}
