//! Media envelope wire format
//!
//! Small JSON envelopes exchanged with the carrier or browser over the
//! WebSocket. Inbound: `start`, `media`, `stop`. Outbound: `media`, `mark`,
//! `clear` (`clear` drains the far-end playout buffer on barge-in). Audio
//! payloads are base64 16-bit little-endian PCM at the rate declared in the
//! start message.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::TransportError;

/// Audio format declared by the carrier in the start message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for MediaFormat {
    fn default() -> Self {
        Self {
            encoding: "audio/l16".to_string(),
            sample_rate: 8000,
            channels: 1,
        }
    }
}

/// Stream identifiers and format from the start message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMeta {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid")]
    pub call_sid: String,
    pub media_format: MediaFormat,
}

/// Payload body of a media envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64 16-bit LE PCM
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
}

/// Envelope received from the carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEnvelope {
    Start { start: StartMeta },
    Media { media: MediaPayload },
    Stop,
}

impl InboundEnvelope {
    pub fn decode(raw: &str) -> Result<Self, TransportError> {
        serde_json::from_str(raw).map_err(|e| TransportError::MalformedEnvelope(e.to_string()))
    }

    /// Decode the PCM payload of a media envelope.
    pub fn media_pcm(&self) -> Result<Option<(Vec<u8>, Option<String>)>, TransportError> {
        match self {
            InboundEnvelope::Media { media } => {
                let pcm = BASE64
                    .decode(&media.payload)
                    .map_err(|e| TransportError::MalformedEnvelope(e.to_string()))?;
                Ok(Some((pcm, media.track.clone())))
            }
            _ => Ok(None),
        }
    }
}

/// Envelope sent back to the carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    Media { media: MediaPayload },
    Mark { mark: String },
    Clear,
}

impl OutboundEnvelope {
    pub fn media(pcm: &[u8]) -> Self {
        OutboundEnvelope::Media {
            media: MediaPayload {
                payload: BASE64.encode(pcm),
                track: None,
            },
        }
    }

    pub fn mark(name: impl Into<String>) -> Self {
        OutboundEnvelope::Mark { mark: name.into() }
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_envelope_decode() {
        let raw = r#"{"event":"start","start":{"streamSid":"MZ123","callSid":"CA456","media_format":{"encoding":"audio/l16","sample_rate":8000,"channels":1}}}"#;
        let envelope = InboundEnvelope::decode(raw).unwrap();
        match envelope {
            InboundEnvelope::Start { start } => {
                assert_eq!(start.stream_sid, "MZ123");
                assert_eq!(start.media_format.sample_rate, 8000);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_media_roundtrip_byte_identical() {
        // 20ms of a ramp at 8 kHz
        let pcm: Vec<u8> = (0..320).map(|i| (i % 251) as u8).collect();
        let encoded = OutboundEnvelope::media(&pcm).encode().unwrap();

        // An outbound media envelope has the same shape as an inbound one
        let decoded = InboundEnvelope::decode(&encoded).unwrap();
        let (roundtrip, _) = decoded.media_pcm().unwrap().unwrap();
        assert_eq!(roundtrip, pcm);
    }

    #[test]
    fn test_stop_and_clear() {
        assert_eq!(
            InboundEnvelope::decode(r#"{"event":"stop"}"#).unwrap(),
            InboundEnvelope::Stop
        );
        assert_eq!(OutboundEnvelope::Clear.encode().unwrap(), r#"{"event":"clear"}"#);
    }

    #[test]
    fn test_malformed_envelope() {
        assert!(InboundEnvelope::decode("{not json").is_err());
        assert!(InboundEnvelope::decode(r#"{"event":"media","media":{"payload":"!!"}}"#)
            .unwrap()
            .media_pcm()
            .is_err());
    }

    #[test]
    fn test_mark_encoding() {
        let encoded = OutboundEnvelope::mark("sentence-3").encode().unwrap();
        assert_eq!(encoded, r#"{"event":"mark","mark":"sentence-3"}"#);
    }
}
