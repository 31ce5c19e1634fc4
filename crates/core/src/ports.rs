//! Port contracts for streaming providers
//!
//! All major external services implement these traits to enable:
//! - Pluggable backends (swap providers via configuration, no code changes)
//! - Testing with scripted in-process implementations
//! - Fallback wrapping without the pipeline knowing
//!
//! Streams returned by ports are finite, not restartable, and cancellable at
//! any suspension point: dropping the stream aborts the underlying request.
//! Implementations must make the drop path cheap (LLM ≤ 100 ms, TTS ≤ 50 ms).

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::AudioFrame;
use crate::conversation::Message;
use crate::error::PortError;
use crate::frame::TextFrame;

/// Stream of audio frames from a TTS provider
pub type AudioFrameStream = BoxStream<'static, std::result::Result<AudioFrame, PortError>>;
/// Stream of text frames from an STT provider
pub type TextFrameStream = BoxStream<'static, std::result::Result<TextFrame, PortError>>;
/// Stream of chunks from an LLM provider
pub type LlmChunkStream = BoxStream<'static, std::result::Result<LlmChunk, PortError>>;

/// Why an LLM stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Error,
    /// Synthesized locally when a stream is cancelled mid-generation
    Interrupted,
}

/// Incremental slice of a streamed function call. `name` arrives on the
/// first slice; later slices append to `arguments`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// One slice of an LLM stream. Exactly one of `content` or `function_call`
/// is set per chunk, except the terminal chunk which carries `finish_reason`
/// and may be otherwise empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmChunk {
    pub content: Option<String>,
    pub function_call: Option<FunctionCallDelta>,
    pub finish_reason: Option<FinishReason>,
}

impl LlmChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn function_call(delta: FunctionCallDelta) -> Self {
        Self {
            function_call: Some(delta),
            ..Default::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// A tool exposed to the LLM, in function-calling schema form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: Value,
}

/// Generation request sent to an LLM port.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// System prompt, style directives already appended
    pub system_prompt: String,
    /// Dialogue window, oldest first
    pub messages: Vec<Message>,
    /// Tools the model may call; empty disables function calling
    pub tools: Vec<ToolSpec>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Synthesis request sent to a TTS port.
#[derive(Debug, Clone)]
pub struct TtsRequest {
    pub text: String,
    pub voice: String,
    pub language: String,
    /// 0.5–2.0, 1.0 = normal
    pub speed: f32,
    /// Semitone offset, 0.0 = normal
    pub pitch: f32,
    /// 0–100
    pub volume: f32,
    pub style: Option<String>,
    pub style_degree: Option<f32>,
    /// Output sample rate the transport expects
    pub sample_rate: u32,
    /// Set when the outbound queue is falling behind; adapters may raise the
    /// synthesis rate by a factor of at most 1.3 in response
    pub backpressure_hint: bool,
}

impl Default for TtsRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            voice: String::new(),
            language: "en-US".to_string(),
            speed: 1.0,
            pitch: 0.0,
            volume: 100.0,
            style: None,
            style_degree: None,
            sample_rate: 8000,
            backpressure_hint: false,
        }
    }
}

/// Result of a tool invocation. Tool failures are data, not pipeline
/// errors: the LLM is expected to recover conversationally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub result: Value,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Speech-to-text provider.
#[async_trait]
pub trait SttPort: Send + Sync {
    /// Consume audio until the input stream closes or the output stream is
    /// dropped; yield partial frames continuously and a final frame per
    /// utterance. Must be idempotent on cancellation.
    async fn transcribe_stream(
        &self,
        audio: BoxStream<'static, AudioFrame>,
    ) -> std::result::Result<TextFrameStream, PortError>;
}

/// Large language model provider.
#[async_trait]
pub trait LlmPort: Send + Sync {
    /// Yield chunks in order; the last chunk must carry a finish reason.
    /// Dropping the stream must abort generation within 100 ms.
    async fn generate_stream(
        &self,
        request: LlmRequest,
    ) -> std::result::Result<LlmChunkStream, PortError>;
}

/// Text-to-speech provider.
#[async_trait]
pub trait TtsPort: Send + Sync {
    /// Emit audio at (or faster than) playback rate. Dropping the stream
    /// must stop synthesis within 50 ms.
    async fn synthesize_stream(
        &self,
        request: TtsRequest,
    ) -> std::result::Result<AudioFrameStream, PortError>;
}

/// Tool executor, synchronous from the pipeline's perspective.
#[async_trait]
pub trait ToolPort: Send + Sync {
    async fn invoke(
        &self,
        name: &str,
        arguments: Value,
    ) -> std::result::Result<ToolOutcome, PortError>;

    /// Schemas of the tools this port can execute
    fn specs(&self) -> Vec<ToolSpec>;
}
