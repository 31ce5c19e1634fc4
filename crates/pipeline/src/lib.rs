//! Real-time conversation pipeline
//!
//! This crate is the per-call engine: it bridges a bidirectional audio
//! transport to streaming STT, LLM, and TTS ports and produces an
//! interruptible spoken dialogue. The pipeline is linear —
//! transport → VAD → STT → aggregator → LLM → TTS → transport — with an
//! out-of-band control channel for interrupts that must never queue behind
//! audio.
//!
//! Modules:
//! - [`control`]: priority control channel (interrupt / cancel / stop)
//! - [`state`]: conversation state machine
//! - [`vad`]: voice activity detection and turn-end timing
//! - [`stt`]: per-turn STT session management
//! - [`aggregator`]: dialogue history and tool-call accumulation
//! - [`llm`]: cancellable LLM chunk pump
//! - [`tts`]: sentence assembly and streaming synthesis
//! - [`outbound`]: transport writer with stale-trace filtering
//! - [`orchestrator`]: per-call lifecycle and turn engine

pub mod aggregator;
pub mod control;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod outbound;
pub mod state;
pub mod stt;
pub mod tts;
pub mod vad;

pub use aggregator::ContextAggregator;
pub use control::ControlChannel;
pub use llm::LlmProcessor;
pub use orchestrator::{Orchestrator, PipelineEvent};
pub use outbound::{OutboundEvent, OutboundItem, OutboundWriter, SpokenTracker};
pub use state::{ConversationState, StateEvent, StateMachine, TransitionRecord};
pub use stt::SttProcessor;
pub use tts::{SentenceSplitter, TtsProcessor};
pub use vad::{EnergyVadScorer, VadConfig, VadEvent, VadProcessor, VadScorer};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("VAD error: {0}")]
    Vad(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Port error: {0}")]
    Port(#[from] voice_orchestrator_core::PortError),
}
