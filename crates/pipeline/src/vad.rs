//! Voice activity detection and turn-end timing
//!
//! Dual stage: a frame scorer maps each audio frame to `speech ∈ [0, 1]`,
//! then confirmation windows turn the per-frame decisions into
//! started/stopped events. Speech start needs 200 ms of consecutive voiced
//! frames (clicks and line noise stay silent); speech stop needs the
//! configured silence window, which the pacing profile rescales.

use voice_orchestrator_core::AudioFrame;

/// Frame-level speech scorer.
///
/// The energy scorer below is the built-in implementation; a learned model
/// plugs in through this trait. `score` runs on the engine's cooperative
/// worker, so scorers that do real inference must dispatch to the blocking
/// pool internally (and say so via
/// [`requires_blocking_pool`](Self::requires_blocking_pool)); per-frame
/// energy math does not warrant the hop.
pub trait VadScorer: Send {
    /// Speech probability of one frame, in [0, 1]
    fn score(&mut self, frame: &AudioFrame) -> f32;

    fn requires_blocking_pool(&self) -> bool {
        false
    }

    fn reset(&mut self) {}
}

/// Energy-based scorer with a slowly adapting noise floor.
pub struct EnergyVadScorer {
    /// dBFS treated as certain silence
    floor_db: f32,
    /// dBFS treated as certain speech
    ceiling_db: f32,
    /// Smoothed frame energy
    smoothed_db: f32,
}

impl EnergyVadScorer {
    pub fn new() -> Self {
        Self {
            floor_db: -55.0,
            ceiling_db: -25.0,
            smoothed_db: -55.0,
        }
    }
}

impl Default for EnergyVadScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl VadScorer for EnergyVadScorer {
    fn score(&mut self, frame: &AudioFrame) -> f32 {
        let rms = frame.rms();
        let db = 20.0 * (rms + 1e-6).log10();
        // Fast attack, slow release
        if db > self.smoothed_db {
            self.smoothed_db = db;
        } else {
            self.smoothed_db = 0.7 * self.smoothed_db + 0.3 * db;
        }
        ((self.smoothed_db - self.floor_db) / (self.ceiling_db - self.floor_db)).clamp(0.0, 1.0)
    }

    fn reset(&mut self) {
        self.smoothed_db = self.floor_db;
    }
}

/// VAD configuration, derived from the call's config snapshot.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Voiced iff score >= threshold
    pub threshold: f32,
    /// Consecutive voiced duration before SpeechStarted
    pub confirmation_window_ms: u64,
    /// Consecutive silence before SpeechStopped
    pub silence_threshold_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            confirmation_window_ms: 200,
            silence_threshold_ms: 500,
        }
    }
}

/// Events produced by the detector. Idempotent per turn: one started and
/// one stopped event per utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    SpeechStopped,
}

/// Stateful detector over a stream of audio frames.
pub struct VadProcessor {
    config: VadConfig,
    scorer: Box<dyn VadScorer>,
    speaking: bool,
    voiced_ms: u64,
    silence_ms: u64,
}

impl VadProcessor {
    pub fn new(config: VadConfig, scorer: Box<dyn VadScorer>) -> Self {
        Self {
            config,
            scorer,
            speaking: false,
            voiced_ms: 0,
            silence_ms: 0,
        }
    }

    pub fn with_energy_scorer(config: VadConfig) -> Self {
        Self::new(config, Box::new(EnergyVadScorer::new()))
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Score one frame and advance the confirmation windows.
    pub fn process(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        let score = self.scorer.score(frame);
        let voiced = score >= self.config.threshold;
        let frame_ms = frame.duration_ms().max(1);

        if self.speaking {
            if voiced {
                self.silence_ms = 0;
            } else {
                self.silence_ms += frame_ms;
                if self.silence_ms >= self.config.silence_threshold_ms {
                    self.speaking = false;
                    self.silence_ms = 0;
                    self.voiced_ms = 0;
                    return Some(VadEvent::SpeechStopped);
                }
            }
        } else if voiced {
            self.voiced_ms += frame_ms;
            if self.voiced_ms >= self.config.confirmation_window_ms {
                self.speaking = true;
                self.voiced_ms = 0;
                self.silence_ms = 0;
                return Some(VadEvent::SpeechStarted);
            }
        } else {
            // A single unvoiced frame breaks the confirmation run
            self.voiced_ms = 0;
        }

        None
    }

    pub fn reset(&mut self) {
        self.speaking = false;
        self.voiced_ms = 0;
        self.silence_ms = 0;
        self.scorer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scorer that replays a fixed score sequence.
    struct FixedScorer {
        scores: Vec<f32>,
        index: usize,
    }

    impl FixedScorer {
        fn new(scores: Vec<f32>) -> Self {
            Self { scores, index: 0 }
        }
    }

    impl VadScorer for FixedScorer {
        fn score(&mut self, _frame: &AudioFrame) -> f32 {
            let s = self.scores[self.index.min(self.scores.len() - 1)];
            self.index += 1;
            s
        }
    }

    fn frame_20ms() -> AudioFrame {
        AudioFrame::silence(20, 8000, 1)
    }

    fn detector(scores: Vec<f32>) -> VadProcessor {
        VadProcessor::new(VadConfig::default(), Box::new(FixedScorer::new(scores)))
    }

    #[test]
    fn test_confirmation_window_suppresses_blips() {
        // 3 voiced frames (60ms) then silence: never confirms
        let mut vad = detector(vec![0.9, 0.9, 0.9, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1]);
        for _ in 0..10 {
            assert_eq!(vad.process(&frame_20ms()), None);
        }
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_speech_start_after_200ms() {
        let mut vad = detector(vec![0.9; 20]);
        let mut started_at = None;
        for i in 0..12 {
            if vad.process(&frame_20ms()) == Some(VadEvent::SpeechStarted) {
                started_at = Some(i);
                break;
            }
        }
        // 10 frames of 20ms = 200ms
        assert_eq!(started_at, Some(9));
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_silence_window_resets_on_resumed_speech() {
        let mut scores = vec![0.9; 10]; // confirm speech
        scores.extend(vec![0.1; 20]); // 400ms silence, under the 500ms window
        scores.extend(vec![0.9; 5]); // speech resumes
        scores.extend(vec![0.1; 25]); // full 500ms silence
        let mut vad = detector(scores);

        let mut events = Vec::new();
        for _ in 0..60 {
            if let Some(e) = vad.process(&frame_20ms()) {
                events.push(e);
            }
        }
        assert_eq!(
            events,
            vec![VadEvent::SpeechStarted, VadEvent::SpeechStopped]
        );
    }

    #[test]
    fn test_stop_after_silence_threshold() {
        let mut scores = vec![0.9; 10];
        scores.extend(vec![0.1; 30]);
        let mut vad = detector(scores);

        let mut stopped = false;
        for _ in 0..40 {
            if vad.process(&frame_20ms()) == Some(VadEvent::SpeechStopped) {
                stopped = true;
            }
        }
        assert!(stopped);
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_energy_scorer_separates_silence_and_tone() {
        let mut scorer = EnergyVadScorer::new();
        let silence = AudioFrame::silence(20, 8000, 1);
        assert!(scorer.score(&silence) < 0.2);

        let loud: Vec<i16> = (0..160)
            .map(|i| ((i as f32 * 0.3).sin() * 16000.0) as i16)
            .collect();
        let tone = AudioFrame::from_samples(&loud, 8000, 1);
        let mut scorer = EnergyVadScorer::new();
        assert!(scorer.score(&tone) > 0.8);
    }

    #[test]
    fn test_reset() {
        let mut vad = detector(vec![0.9; 30]);
        for _ in 0..12 {
            vad.process(&frame_20ms());
        }
        assert!(vad.is_speaking());
        vad.reset();
        assert!(!vad.is_speaking());
    }
}
