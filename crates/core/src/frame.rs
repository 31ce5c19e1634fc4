//! Frame model
//!
//! All inter-processor communication flows as typed frames on bounded
//! queues. Frames are never mutated after emission; a processor that reacts
//! to an input frame emits new frames carrying the same trace id. The trace
//! id identifies one conversational turn; the VAD allocates a fresh one when
//! it confirms the start of user speech.

use std::fmt;
use std::time::Instant;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::AudioFrame;
use crate::error::{ErrorKind, PortKind};
use crate::ports::LlmChunk;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds elapsed on the process-wide monotonic clock.
///
/// Frame timestamps come from this clock so ordering comparisons are safe
/// across tasks; wall-clock time only appears on persisted records.
pub fn monotonic_ns() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

/// Per-turn identifier propagated to every frame for causality tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(Uuid);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Trace id used before the first turn starts (session bootstrap frames)
    pub fn session() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Text produced by STT (user speech) or the LLM (assistant speech).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFrame {
    pub text: String,
    /// Partial frames may be superseded by later frames of the same turn
    pub is_partial: bool,
}

impl TextFrame {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_partial: true,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_partial: false,
        }
    }
}

/// Why a synthesized utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsEndCause {
    Natural,
    Interrupted,
    Error,
}

/// Error surfaced from a processor into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub port: PortKind,
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
}

/// Payload variants carried by a [`Frame`].
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Audio(AudioFrame),
    Text(TextFrame),
    UserStartedSpeaking,
    UserStoppedSpeaking,
    LlmChunk(LlmChunk),
    TtsStart,
    TtsEnd { cause: TtsEndCause },
    Error(ErrorFrame),
}

impl FramePayload {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            FramePayload::Audio(_) => "audio",
            FramePayload::Text(_) => "text",
            FramePayload::UserStartedSpeaking => "user_started_speaking",
            FramePayload::UserStoppedSpeaking => "user_stopped_speaking",
            FramePayload::LlmChunk(_) => "llm_chunk",
            FramePayload::TtsStart => "tts_start",
            FramePayload::TtsEnd { .. } => "tts_end",
            FramePayload::Error(_) => "error",
        }
    }
}

/// The pipeline's unit of flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub trace_id: TraceId,
    pub timestamp_ns: u64,
    pub payload: FramePayload,
}

impl Frame {
    /// Create a frame stamped with the current monotonic time.
    pub fn new(trace_id: TraceId, payload: FramePayload) -> Self {
        Self {
            trace_id,
            timestamp_ns: monotonic_ns(),
            payload,
        }
    }

    pub fn audio(trace_id: TraceId, audio: AudioFrame) -> Self {
        Self::new(trace_id, FramePayload::Audio(audio))
    }

    pub fn text(trace_id: TraceId, text: TextFrame) -> Self {
        Self::new(trace_id, FramePayload::Text(text))
    }

    pub fn error(trace_id: TraceId, error: ErrorFrame) -> Self {
        Self::new(trace_id, FramePayload::Error(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_timestamps() {
        let a = Frame::new(TraceId::new(), FramePayload::UserStartedSpeaking);
        let b = Frame::new(a.trace_id, FramePayload::UserStoppedSpeaking);
        assert!(b.timestamp_ns >= a.timestamp_ns);
        assert_eq!(a.trace_id, b.trace_id);
    }

    #[test]
    fn test_trace_ids_unique() {
        assert_ne!(TraceId::new(), TraceId::new());
        assert_eq!(TraceId::session(), TraceId::session());
    }

    #[test]
    fn test_payload_kind() {
        let f = Frame::text(TraceId::new(), TextFrame::partial("hol"));
        assert_eq!(f.payload.kind(), "text");
    }
}
