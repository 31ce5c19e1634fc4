//! Conversation context
//!
//! Dialogue history plus the in-flight state of the current turn. The
//! context is owned and mutated by the context aggregator only; every other
//! component works on value snapshots. The assistant partial buffer is never
//! observable as a committed message: it is either committed (possibly
//! truncated to what was actually spoken) or discarded.

use serde::{Deserialize, Serialize};

use crate::frame::TraceId;
use crate::ports::FunctionCallDelta;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A completed tool call carried on an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments, exactly as streamed by the model
    pub arguments: String,
}

/// One committed message of the dialogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Accumulator for a function call streamed in slices.
#[derive(Debug, Clone, Default, PartialEq)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

/// Dialogue history and current-turn working state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationContext {
    messages: Vec<Message>,
    assistant_partial: String,
    pending_tool_calls: Vec<ToolCallBuilder>,
    turn_counter: u64,
    current_trace: Option<TraceId>,
}

impl ConversationContext {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            ..Default::default()
        }
    }

    /// Start a new turn. Discards any uncommitted partial state from the
    /// previous turn (an interrupted turn commits its spoken prefix first,
    /// via [`commit_spoken`](Self::commit_spoken)).
    pub fn begin_turn(&mut self, trace_id: TraceId) -> u64 {
        self.assistant_partial.clear();
        self.pending_tool_calls.clear();
        self.turn_counter += 1;
        self.current_trace = Some(trace_id);
        self.turn_counter
    }

    pub fn turn_counter(&self) -> u64 {
        self.turn_counter
    }

    pub fn current_trace(&self) -> Option<TraceId> {
        self.current_trace
    }

    /// Append the user's final transcript for the current turn.
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    /// Append streamed assistant content to the partial buffer.
    pub fn append_partial(&mut self, text: &str) {
        self.assistant_partial.push_str(text);
    }

    pub fn partial(&self) -> &str {
        &self.assistant_partial
    }

    /// Fold one function-call slice into the pending accumulators. A slice
    /// carrying a name opens a new call; nameless slices extend the last.
    pub fn absorb_function_delta(&mut self, delta: &FunctionCallDelta) {
        if let Some(name) = &delta.name {
            let id = delta
                .id
                .clone()
                .unwrap_or_else(|| format!("call_{}", self.pending_tool_calls.len()));
            self.pending_tool_calls.push(ToolCallBuilder {
                id,
                name: name.clone(),
                arguments: delta.arguments.clone(),
            });
        } else if let Some(last) = self.pending_tool_calls.last_mut() {
            last.arguments.push_str(&delta.arguments);
        }
    }

    pub fn has_pending_tool_calls(&self) -> bool {
        !self.pending_tool_calls.is_empty()
    }

    /// Commit the assistant message carrying the accumulated tool calls and
    /// return them for execution. Partial content generated before the calls
    /// stays on the same message.
    pub fn commit_tool_calls(&mut self) -> Vec<ToolCall> {
        let calls: Vec<ToolCall> = self
            .pending_tool_calls
            .drain(..)
            .map(|b| ToolCall {
                id: b.id,
                name: b.name,
                arguments: b.arguments,
            })
            .collect();
        let content = std::mem::take(&mut self.assistant_partial);
        self.messages
            .push(Message::assistant_with_tools(content, calls.clone()));
        calls
    }

    /// Append one tool result message. Must follow the assistant message
    /// that requested it, before the next user/assistant message.
    pub fn push_tool_result(&mut self, call_id: &str, content: impl Into<String>) {
        self.messages.push(Message::tool(call_id, content));
    }

    /// Commit the full partial buffer as the assistant message for this
    /// turn. Returns the committed text; no message is appended when the
    /// buffer is empty.
    pub fn commit_assistant(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.assistant_partial);
        if text.trim().is_empty() {
            return None;
        }
        self.messages.push(Message::assistant(text.clone()));
        Some(text)
    }

    /// Commit only the prefix of the partial buffer that was actually
    /// spoken before an interrupt; the rest is discarded.
    pub fn commit_spoken(&mut self, spoken: &str) -> Option<String> {
        self.assistant_partial.clear();
        let spoken = spoken.trim();
        if spoken.is_empty() {
            return None;
        }
        self.messages.push(Message::assistant(spoken.to_string()));
        Some(spoken.to_string())
    }

    /// Discard all uncommitted working state.
    pub fn discard_partial(&mut self) {
        self.assistant_partial.clear();
        self.pending_tool_calls.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The last `window` non-system messages, oldest first. Tool messages
    /// are never separated from the assistant message that requested them:
    /// the window is widened backwards until the boundary is legal.
    pub fn window(&self, window: usize) -> Vec<Message> {
        let body: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();
        let mut start = body.len().saturating_sub(window);
        while start > 0 && body[start].role == Role::Tool {
            start -= 1;
        }
        body[start..].iter().map(|m| (*m).clone()).collect()
    }

    /// Check the structural invariants of the history. Returns the first
    /// violation found, if any.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let mut expecting_tools: usize = 0;
        for (i, msg) in self.messages.iter().enumerate() {
            match msg.role {
                Role::System => {
                    if i != 0 {
                        return Err(format!("system message at non-prefix position {i}"));
                    }
                }
                Role::Tool => {
                    if expecting_tools == 0 {
                        return Err(format!("tool message at {i} without pending tool calls"));
                    }
                    expecting_tools -= 1;
                }
                Role::Assistant | Role::User => {
                    if expecting_tools > 0 {
                        return Err(format!(
                            "{:?} message at {i} before {expecting_tools} tool result(s)",
                            msg.role
                        ));
                    }
                    if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
                        expecting_tools = msg.tool_calls.len();
                    }
                }
            }
        }
        Ok(())
    }
}
