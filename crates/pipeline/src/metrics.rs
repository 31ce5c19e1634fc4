//! Per-turn latency instrumentation
//!
//! One `TurnTimers` is created when a turn commits (silence confirmed) and
//! fed observation points as the turn progresses. Emits to the `metrics`
//! facade as it goes and produces the latency breakdown persisted on the
//! turn record.

use tokio::time::Instant;
use voice_orchestrator_persistence::LatencyBreakdown;

/// Observation points of one turn.
pub struct TurnTimers {
    turn_committed: Instant,
    stt_final: Option<Instant>,
    llm_first_chunk: Option<Instant>,
    first_audio: Option<Instant>,
}

impl TurnTimers {
    /// Start timing at the moment the turn-end silence was confirmed.
    pub fn start() -> Self {
        Self {
            turn_committed: Instant::now(),
            stt_final: None,
            llm_first_chunk: None,
            first_audio: None,
        }
    }

    pub fn record_stt_final(&mut self) {
        if self.stt_final.is_none() {
            let now = Instant::now();
            self.stt_final = Some(now);
            metrics::histogram!("voice_orchestrator_stt_ttfb_ms")
                .record(ms_between(self.turn_committed, now) as f64);
        }
    }

    pub fn record_llm_first_chunk(&mut self) {
        if self.llm_first_chunk.is_none() {
            let now = Instant::now();
            self.llm_first_chunk = Some(now);
            let from = self.stt_final.unwrap_or(self.turn_committed);
            metrics::histogram!("voice_orchestrator_llm_ttfb_ms")
                .record(ms_between(from, now) as f64);
        }
    }

    pub fn record_first_audio(&mut self) {
        if self.first_audio.is_none() {
            let now = Instant::now();
            self.first_audio = Some(now);
            metrics::histogram!("voice_orchestrator_turn_total_ms")
                .record(ms_between(self.turn_committed, now) as f64);
        }
    }

    /// Breakdown for the turn record. Missing observation points stay zero
    /// (e.g. an interrupted turn that never reached audio).
    pub fn breakdown(&self) -> LatencyBreakdown {
        LatencyBreakdown {
            stt_final_ms: self
                .stt_final
                .map(|t| ms_between(self.turn_committed, t))
                .unwrap_or(0),
            llm_ttfb_ms: self
                .llm_first_chunk
                .map(|t| ms_between(self.stt_final.unwrap_or(self.turn_committed), t))
                .unwrap_or(0),
            tts_ttfb_ms: match (self.llm_first_chunk, self.first_audio) {
                (Some(llm), Some(audio)) => ms_between(llm, audio),
                _ => 0,
            },
            total_ms: self
                .first_audio
                .map(|t| ms_between(self.turn_committed, t))
                .unwrap_or(0),
        }
    }
}

/// Wall-clock latency from interrupt observation to outbound silence.
pub fn record_interrupt_latency(observed_at: Instant) {
    metrics::histogram!("voice_orchestrator_interrupt_latency_ms")
        .record(observed_at.elapsed().as_millis() as f64);
}

fn ms_between(from: Instant, to: Instant) -> u64 {
    to.saturating_duration_since(from).as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_breakdown_accumulates() {
        let mut timers = TurnTimers::start();
        tokio::time::advance(Duration::from_millis(120)).await;
        timers.record_stt_final();
        tokio::time::advance(Duration::from_millis(300)).await;
        timers.record_llm_first_chunk();
        tokio::time::advance(Duration::from_millis(90)).await;
        timers.record_first_audio();

        let breakdown = timers.breakdown();
        assert_eq!(breakdown.stt_final_ms, 120);
        assert_eq!(breakdown.llm_ttfb_ms, 300);
        assert_eq!(breakdown.tts_ttfb_ms, 90);
        assert_eq!(breakdown.total_ms, 510);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_turn_partial_breakdown() {
        let mut timers = TurnTimers::start();
        tokio::time::advance(Duration::from_millis(100)).await;
        timers.record_stt_final();

        let breakdown = timers.breakdown();
        assert_eq!(breakdown.stt_final_ms, 100);
        assert_eq!(breakdown.llm_ttfb_ms, 0);
        assert_eq!(breakdown.total_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observation_points_latch() {
        let mut timers = TurnTimers::start();
        tokio::time::advance(Duration::from_millis(50)).await;
        timers.record_stt_final();
        tokio::time::advance(Duration::from_millis(50)).await;
        // Second call must not move the observation
        timers.record_stt_final();
        assert_eq!(timers.breakdown().stt_final_ms, 50);
    }
}
