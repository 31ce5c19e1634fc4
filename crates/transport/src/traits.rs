//! Transport source/sink traits
//!
//! The pipeline consumes exactly this pair per call. Implementations wrap a
//! WebSocket (server crate) or an in-memory channel pair (tests). Both
//! sides must be cancel-safe: the orchestrator drops them on session end.

use async_trait::async_trait;

use voice_orchestrator_core::AudioFrame;

use crate::TransportError;

/// What the inbound side of the transport can hand the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Caller audio at the negotiated rate
    Audio(AudioFrame),
    /// The far end closed the stream
    Stop,
}

/// Inbound media from the caller.
#[async_trait]
pub trait MediaSource: Send {
    /// Next event, `None` once the underlying connection is gone.
    async fn next_event(&mut self) -> Option<MediaEvent>;
}

/// Outbound media to the caller.
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn send_audio(&self, frame: &AudioFrame) -> Result<(), TransportError>;

    /// Named position marker (sentence boundaries, prompts)
    async fn send_mark(&self, name: &str) -> Result<(), TransportError>;

    /// Drain the far-end playout buffer (barge-in)
    async fn send_clear(&self) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
