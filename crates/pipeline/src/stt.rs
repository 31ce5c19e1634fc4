//! STT processor
//!
//! Owns the streaming STT session for the current user turn. Audio is fed
//! in while the caller speaks; on turn end the audio side closes and the
//! final transcript is awaited with a hard bound. On barge-in a new session
//! starts eagerly so the overlapping speech is not lost; what happens to
//! late finals from the superseded session is a config policy.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::ReceiverStream;
use voice_orchestrator_config::LateFinalPolicy;
use voice_orchestrator_core::{AudioFrame, PortError, SttPort, TraceId};

use crate::PipelineError;

/// How long to wait for the final transcript after closing the audio side.
const FINAL_WAIT: Duration = Duration::from_secs(1);
/// Queue capacity per hop
const AUDIO_QUEUE: usize = 32;

#[derive(Default)]
struct SessionShared {
    partial: Mutex<String>,
    final_text: Mutex<Option<String>>,
    error: Mutex<Option<PortError>>,
}

struct SttSession {
    trace_id: TraceId,
    audio_tx: Option<mpsc::Sender<AudioFrame>>,
    shared: Arc<SessionShared>,
    final_notify: Arc<Notify>,
    pump: tokio::task::JoinHandle<()>,
}

impl SttSession {
    fn abort(self) {
        self.pump.abort();
    }
}

/// Transcript filtering and per-turn session management.
pub struct SttProcessor {
    port: Arc<dyn SttPort>,
    blacklist: Vec<String>,
    late_final_policy: LateFinalPolicy,
    /// Text rescued from a superseded session under the `append` policy
    carryover: Option<String>,
    session: Option<SttSession>,
}

impl SttProcessor {
    pub fn new(port: Arc<dyn SttPort>, blacklist: Vec<String>) -> Self {
        Self::with_policy(port, blacklist, LateFinalPolicy::Drop)
    }

    pub fn with_policy(
        port: Arc<dyn SttPort>,
        blacklist: Vec<String>,
        late_final_policy: LateFinalPolicy,
    ) -> Self {
        Self {
            port,
            blacklist,
            late_final_policy,
            carryover: None,
            session: None,
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_trace(&self) -> Option<TraceId> {
        self.session.as_ref().map(|s| s.trace_id)
    }

    /// Open a session for a new turn. Any previous session is torn down
    /// first; its still-pending results are dropped.
    pub async fn start_session(&mut self, trace_id: TraceId) -> Result<(), PipelineError> {
        if let Some(old) = self.session.take() {
            tracing::debug!(old_trace = %old.trace_id, "superseding STT session");
            if self.late_final_policy == LateFinalPolicy::Append {
                let rescued = old
                    .shared
                    .final_text
                    .lock()
                    .take()
                    .unwrap_or_else(|| old.shared.partial.lock().clone());
                if !rescued.trim().is_empty() {
                    self.carryover = Some(rescued);
                }
            }
            old.abort();
        }

        let (audio_tx, audio_rx) = mpsc::channel::<AudioFrame>(AUDIO_QUEUE);
        let audio_stream = ReceiverStream::new(audio_rx).boxed();
        let mut results = self.port.transcribe_stream(audio_stream).await?;

        let shared = Arc::new(SessionShared::default());
        let final_notify = Arc::new(Notify::new());

        let pump_shared = shared.clone();
        let pump_notify = final_notify.clone();
        let pump = tokio::spawn(async move {
            while let Some(item) = results.next().await {
                match item {
                    Ok(frame) => {
                        if frame.is_partial {
                            *pump_shared.partial.lock() = frame.text;
                        } else {
                            *pump_shared.final_text.lock() = Some(frame.text);
                            pump_notify.notify_one();
                            // One final per utterance; the session is done
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "STT stream error");
                        *pump_shared.error.lock() = Some(err);
                        pump_notify.notify_one();
                        break;
                    }
                }
            }
            // Stream ended without a final: unblock the waiter
            pump_notify.notify_one();
        });

        self.session = Some(SttSession {
            trace_id,
            audio_tx: Some(audio_tx),
            shared,
            final_notify,
            pump,
        });
        Ok(())
    }

    /// Route one audio frame into the live session. Frames arriving with no
    /// session (or for a stale trace) are dropped, and a full session queue
    /// drops the frame rather than stalling the engine: late audio is worth
    /// less than a blocked control path.
    pub fn feed(&mut self, trace_id: TraceId, frame: AudioFrame) {
        let Some(session) = &self.session else {
            return;
        };
        if session.trace_id != trace_id {
            tracing::trace!(%trace_id, "dropping audio for stale trace");
            return;
        }
        if let Some(tx) = &session.audio_tx {
            match tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!("STT audio queue full, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("STT session input closed early");
                }
            }
        }
    }

    /// Words recognized so far in the live session (partials included).
    pub fn partial_word_count(&self) -> usize {
        self.session
            .as_ref()
            .map(|s| s.shared.partial.lock().split_whitespace().count())
            .unwrap_or(0)
    }

    /// Close the audio side, wait (bounded) for the final transcript, and
    /// tear the session down. Returns the filtered transcript: `None` for
    /// silence, blacklisted hallucinations, or a timed-out final.
    pub async fn finalize(&mut self) -> Result<Option<String>, PipelineError> {
        let Some(mut session) = self.session.take() else {
            return Ok(None);
        };

        // Closing the channel ends the port's audio stream
        session.audio_tx = None;

        let wait = tokio::time::timeout(FINAL_WAIT, session.final_notify.notified()).await;
        let final_text = session.shared.final_text.lock().take();
        let error = session.shared.error.lock().take();
        session.abort();

        if let Some(err) = error {
            return Err(PipelineError::Port(err));
        }
        if wait.is_err() {
            tracing::warn!("no STT final within bound, treating turn as empty");
            return Ok(self.carryover.take().and_then(|text| self.filter(text)));
        }

        let text = match (self.carryover.take(), final_text) {
            (Some(carried), Some(text)) => Some(format!("{carried} {text}")),
            (Some(carried), None) => Some(carried),
            (None, text) => text,
        };
        Ok(text.and_then(|text| self.filter(text)))
    }

    /// Drop the live session without waiting for results.
    pub fn abort(&mut self) {
        if let Some(session) = self.session.take() {
            session.abort();
        }
    }

    fn filter(&self, text: String) -> Option<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        for phrase in &self.blacklist {
            if !phrase.is_empty() && trimmed.contains(phrase.as_str()) {
                tracing::info!(transcript = %trimmed, phrase = %phrase, "dropping blacklisted final");
                return None;
            }
        }
        Some(trimmed.to_string())
    }
}
