//! Audio transport
//!
//! The bidirectional byte-stream side of a call: JSON media envelopes over
//! WebSocket, raw 16-bit PCM payloads, and sample-rate conversion between
//! the carrier's rate and whatever the speech ports want. The concrete
//! socket binding lives in the server crate; this crate owns the wire
//! format and the source/sink traits the pipeline consumes.

pub mod codec;
pub mod envelope;
pub mod traits;

pub use codec::{pcm_bytes_to_f32, pcm_f32_to_bytes, Resampler};
pub use envelope::{InboundEnvelope, MediaFormat, OutboundEnvelope, StartMeta};
pub use traits::{MediaEvent, MediaSink, MediaSource};

use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unsupported media format: {0}")]
    UnsupportedFormat(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
