//! Scripted LLM provider
//!
//! Streams canned replies chunk by chunk, including function-call turns, so
//! the tool-calling loop and interruption paths can be exercised without a
//! model behind them. Echo mode repeats the last user message, which keeps
//! ad-hoc dev sessions conversational.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use voice_orchestrator_core::{
    FinishReason, FunctionCallDelta, LlmChunk, LlmChunkStream, LlmPort, LlmRequest, PortError,
    Role,
};

/// One scripted assistant turn.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Stream this text in word-sized content chunks, then `stop`
    Text(String),
    /// Emit a function call, then `tool_calls`
    ToolCall { name: String, arguments: String },
}

enum Mode {
    Echo,
    Script(Mutex<VecDeque<ScriptedReply>>),
}

pub struct ScriptedLlm {
    mode: Arc<Mode>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            mode: Arc::new(Mode::Script(Mutex::new(replies.into()))),
        }
    }

    /// Repeat the last user message back. Registered as the `scripted` LLM.
    pub fn echo() -> Self {
        Self {
            mode: Arc::new(Mode::Echo),
        }
    }

    fn next_reply(&self, request: &LlmRequest) -> ScriptedReply {
        match &*self.mode {
            Mode::Echo => {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                ScriptedReply::Text(last_user)
            }
            Mode::Script(replies) => replies
                .lock()
                .pop_front()
                .unwrap_or(ScriptedReply::Text(String::new())),
        }
    }
}

#[async_trait]
impl LlmPort for ScriptedLlm {
    async fn generate_stream(&self, request: LlmRequest) -> Result<LlmChunkStream, PortError> {
        let chunks: Vec<Result<LlmChunk, PortError>> = match self.next_reply(&request) {
            ScriptedReply::Text(text) => {
                let mut chunks: Vec<Result<LlmChunk, PortError>> = text
                    .split_inclusive(' ')
                    .map(|word| Ok(LlmChunk::content(word)))
                    .collect();
                chunks.push(Ok(LlmChunk::finish(FinishReason::Stop)));
                chunks
            }
            ScriptedReply::ToolCall { name, arguments } => vec![
                Ok(LlmChunk::function_call(FunctionCallDelta {
                    id: Some(format!("call_{name}")),
                    name: Some(name),
                    arguments,
                })),
                Ok(LlmChunk::finish(FinishReason::ToolCalls)),
            ],
        };
        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_orchestrator_core::Message;

    async fn drain(mut stream: LlmChunkStream) -> (String, Option<FinishReason>) {
        let mut text = String::new();
        let mut finish = None;
        while let Some(Ok(chunk)) = stream.next().await {
            if let Some(c) = chunk.content {
                text.push_str(&c);
            }
            if chunk.finish_reason.is_some() {
                finish = chunk.finish_reason;
            }
        }
        (text, finish)
    }

    #[tokio::test]
    async fn test_echo_repeats_user() {
        let llm = ScriptedLlm::echo();
        let request = LlmRequest {
            messages: vec![Message::user("Hola")],
            ..Default::default()
        };
        let (text, finish) = drain(llm.generate_stream(request).await.unwrap()).await;
        assert_eq!(text, "Hola");
        assert_eq!(finish, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_scripted_tool_call() {
        let llm = ScriptedLlm::new(vec![
            ScriptedReply::ToolCall {
                name: "get_balance".to_string(),
                arguments: "{\"id\":42}".to_string(),
            },
            ScriptedReply::Text("Tu saldo es $123.45.".to_string()),
        ]);

        let mut stream = llm.generate_stream(LlmRequest::default()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        let call = first.function_call.unwrap();
        assert_eq!(call.name.as_deref(), Some("get_balance"));
        let terminal = stream.next().await.unwrap().unwrap();
        assert_eq!(terminal.finish_reason, Some(FinishReason::ToolCalls));

        let (text, finish) = drain(llm.generate_stream(LlmRequest::default()).await.unwrap()).await;
        assert_eq!(text, "Tu saldo es $123.45.");
        assert_eq!(finish, Some(FinishReason::Stop));
    }
}
