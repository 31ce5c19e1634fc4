//! Silence TTS provider
//!
//! Synthesizes silence sized to the text, emitted in 20 ms frames at the
//! requested sample rate. Real-time pacing is optional: paced mode sleeps
//! between frames so barge-in timing behaves like a live synthesizer
//! (tokio's paused clock makes that cheap in tests).

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use voice_orchestrator_core::{
    AudioFrame, AudioFrameStream, PortError, TtsPort, TtsRequest,
};

const FRAME_MS: u64 = 20;
/// Speaking rate the silence length is derived from
const CHARS_PER_SECOND: f32 = 15.0;

pub struct SilenceTts {
    speed: f32,
    paced: bool,
}

impl SilenceTts {
    pub fn new(speed: f32) -> Self {
        Self {
            speed: speed.max(0.5),
            paced: false,
        }
    }

    /// Emit frames at playback rate instead of as fast as possible.
    pub fn paced(speed: f32) -> Self {
        Self {
            speed: speed.max(0.5),
            paced: true,
        }
    }

    fn utterance_ms(&self, request: &TtsRequest) -> u64 {
        let mut rate = CHARS_PER_SECOND * self.speed;
        if request.backpressure_hint {
            rate *= 1.3;
        }
        let chars = request.text.chars().count().max(1) as f32;
        ((chars / rate) * 1000.0) as u64
    }
}

#[async_trait]
impl TtsPort for SilenceTts {
    async fn synthesize_stream(&self, request: TtsRequest) -> Result<AudioFrameStream, PortError> {
        let total_ms = self.utterance_ms(&request);
        let frames = (total_ms / FRAME_MS).max(1);
        let sample_rate = request.sample_rate;
        let paced = self.paced;

        let stream = futures::stream::unfold(0u64, move |emitted| async move {
            if emitted >= frames {
                return None;
            }
            if paced && emitted > 0 {
                tokio::time::sleep(Duration::from_millis(FRAME_MS)).await;
            }
            let frame = AudioFrame::silence(FRAME_MS, sample_rate, 1);
            Some((Ok(frame), emitted + 1))
        });

        Ok(stream.boxed())
    }
}
