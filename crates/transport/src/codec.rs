//! PCM codec and resampling
//!
//! The wire carries 16-bit little-endian PCM; ports may require a different
//! rate (telephony delivers 8 kHz, most STT models want 16 kHz). Rate
//! conversion happens here, at the transport boundary, so the pipeline only
//! ever sees frames at the rate the ports asked for.

use crate::TransportError;

/// Convert 16-bit LE PCM bytes to f32 samples in [-1.0, 1.0].
pub fn pcm_bytes_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}

/// Convert f32 samples to 16-bit LE PCM bytes, clamping out-of-range input.
pub fn pcm_f32_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
        pcm.extend_from_slice(&v.to_le_bytes());
    }
    pcm
}

/// Sample-rate converter between the carrier rate and a port's rate.
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, TransportError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(TransportError::UnsupportedFormat(format!(
                "invalid rates {from_rate} -> {to_rate}"
            )));
        }
        Ok(Self { from_rate, to_rate })
    }

    pub fn is_noop(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Resample PCM bytes. Uses rubato's FFT resampler; very short inputs
    /// fall back to linear interpolation, which the FFT window cannot
    /// handle.
    pub fn resample_bytes(&self, pcm: &[u8]) -> Vec<u8> {
        if self.is_noop() {
            return pcm.to_vec();
        }
        let samples = pcm_bytes_to_f32(pcm);
        pcm_f32_to_bytes(&self.resample(&samples))
    }

    /// Resample f32 samples.
    pub fn resample(&self, input: &[f32]) -> Vec<f32> {
        use rubato::{FftFixedIn, Resampler as RubatoResampler};

        if self.is_noop() || input.is_empty() {
            return input.to_vec();
        }

        if input.len() < 64 {
            return self.resample_linear(input);
        }

        let samples_f64: Vec<f64> = input.iter().map(|&s| s as f64).collect();
        let chunk_size = input.len().min(1024);

        match FftFixedIn::<f64>::new(
            self.from_rate as usize,
            self.to_rate as usize,
            chunk_size,
            2,
            1,
        ) {
            Ok(mut resampler) => {
                let frames = vec![samples_f64];
                match resampler.process(&frames, None) {
                    Ok(output) => output[0].iter().map(|&s| s as f32).collect(),
                    Err(e) => {
                        tracing::warn!("resampler processing failed: {e}");
                        self.resample_linear(input)
                    }
                }
            }
            Err(e) => {
                tracing::warn!("resampler init failed: {e}");
                self.resample_linear(input)
            }
        }
    }

    fn resample_linear(&self, input: &[f32]) -> Vec<f32> {
        let ratio = self.to_rate as f64 / self.from_rate as f64;
        let output_len = (input.len() as f64 * ratio).ceil() as usize;
        let mut output = Vec::with_capacity(output_len);

        for i in 0..output_len {
            let src_idx = i as f64 / ratio;
            let idx_floor = src_idx.floor() as usize;
            let idx_ceil = (idx_floor + 1).min(input.len().saturating_sub(1));
            let frac = (src_idx - idx_floor as f64) as f32;

            let sample = input[idx_floor] * (1.0 - frac) + input[idx_ceil] * frac;
            output.push(sample);
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_roundtrip() {
        let samples = vec![0.0f32, 0.5, -0.5, 0.999, -1.0];
        let bytes = pcm_f32_to_bytes(&samples);
        let back = pcm_bytes_to_f32(&bytes);
        for (a, b) in samples.iter().zip(back.iter()) {
            assert!((a - b).abs() < 0.001, "{a} vs {b}");
        }
    }

    #[test]
    fn test_clamping() {
        let bytes = pcm_f32_to_bytes(&[2.0, -2.0]);
        let back = pcm_bytes_to_f32(&bytes);
        assert!(back[0] > 0.99);
        assert!(back[1] < -0.99);
    }

    #[test]
    fn test_noop_resample() {
        let resampler = Resampler::new(8000, 8000).unwrap();
        let pcm: Vec<u8> = (0..320).map(|i| i as u8).collect();
        assert_eq!(resampler.resample_bytes(&pcm), pcm);
    }

    #[test]
    fn test_upsample_ratio() {
        let resampler = Resampler::new(8000, 16000).unwrap();
        let input: Vec<f32> = (0..160).map(|i| (i as f32 * 0.1).sin()).collect();
        let output = resampler.resample(&input);
        assert_eq!(output.len(), 320);
    }

    #[test]
    fn test_short_input_linear_path() {
        let resampler = Resampler::new(8000, 16000).unwrap();
        let input: Vec<f32> = (0..10).map(|i| i as f32 / 10.0).collect();
        let output = resampler.resample(&input);
        assert_eq!(output.len(), 20);
    }

    #[test]
    fn test_invalid_rate_rejected() {
        assert!(Resampler::new(0, 16000).is_err());
    }
}
