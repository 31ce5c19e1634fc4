//! Core types for the voice conversation orchestrator
//!
//! This crate provides the foundational vocabulary used across all other
//! crates:
//! - Frame and control-message model for the pipeline
//! - Audio frame type and PCM helpers
//! - Conversation context (dialogue history, tool-call accumulation)
//! - Port contracts for STT / LLM / TTS / tool providers
//! - Error taxonomy

pub mod audio;
pub mod control;
pub mod conversation;
pub mod error;
pub mod frame;
pub mod ports;

pub use audio::AudioFrame;
pub use control::{ControlKind, ControlMessage};
pub use conversation::{ConversationContext, Message, Role, ToolCall};
pub use error::{Error, ErrorKind, PortError, PortKind, Result};
pub use frame::{monotonic_ns, ErrorFrame, Frame, FramePayload, TextFrame, TraceId, TtsEndCause};
pub use ports::{
    AudioFrameStream, FinishReason, FunctionCallDelta, LlmChunk, LlmChunkStream, LlmPort,
    LlmRequest, SttPort, TextFrameStream, ToolOutcome, ToolPort, ToolSpec, TtsPort, TtsRequest,
};
