//! Audio frame type and PCM helpers
//!
//! All audio in the pipeline is raw 16-bit little-endian PCM. Telephony
//! carriers deliver 8 kHz mono; browsers deliver 16 kHz mono. Resampling to
//! a port's required rate is the transport adapter's job.

use serde::{Deserialize, Serialize};

/// A chunk of raw PCM audio flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Raw PCM bytes, 16-bit little-endian
    pub pcm: Vec<u8>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (1 for all supported transports)
    pub channels: u8,
}

impl AudioFrame {
    /// Create a frame from raw PCM bytes
    pub fn new(pcm: Vec<u8>, sample_rate: u32, channels: u8) -> Self {
        Self {
            pcm,
            sample_rate,
            channels,
        }
    }

    /// Create a frame from i16 samples
    pub fn from_samples(samples: &[i16], sample_rate: u32, channels: u8) -> Self {
        let mut pcm = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            pcm.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            pcm,
            sample_rate,
            channels,
        }
    }

    /// Create a frame of silence covering `duration_ms`
    pub fn silence(duration_ms: u64, sample_rate: u32, channels: u8) -> Self {
        let sample_count = (sample_rate as u64 * duration_ms / 1000) as usize * channels as usize;
        Self {
            pcm: vec![0u8; sample_count * 2],
            sample_rate,
            channels,
        }
    }

    /// Decode the PCM bytes into i16 samples. A trailing odd byte is dropped.
    pub fn samples(&self) -> Vec<i16> {
        self.pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    /// Number of samples per channel
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2 / self.channels.max(1) as usize
    }

    /// Duration of the frame in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.sample_count() as u64 * 1000) / self.sample_rate as u64
    }

    /// Root-mean-square amplitude, normalized to [0, 1]
    pub fn rms(&self) -> f32 {
        let samples = self.samples();
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = samples
            .iter()
            .map(|&s| {
                let f = s as f64 / i16::MAX as f64;
                f * f
            })
            .sum();
        (sum_sq / samples.len() as f64).sqrt() as f32
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}
