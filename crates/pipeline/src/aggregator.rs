//! Context aggregator
//!
//! Sole owner of the conversation context. Folds STT finals and LLM chunks
//! into committed history, accumulates streamed tool calls, and builds the
//! next LLM request from the configured history window. Everything else in
//! the pipeline sees snapshots only.

use voice_orchestrator_config::ConfigSnapshot;
use voice_orchestrator_core::{
    ConversationContext, FunctionCallDelta, LlmRequest, Message, ToolCall, ToolOutcome, ToolSpec,
    TraceId,
};

/// Maximum tool-calling round-trips per turn before forcing a spoken answer.
pub const MAX_TOOL_DEPTH: usize = 5;

pub struct ContextAggregator {
    ctx: ConversationContext,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: String,
    context_window: usize,
    tool_specs: Vec<ToolSpec>,
}

impl ContextAggregator {
    pub fn new(config: &ConfigSnapshot, tool_specs: Vec<ToolSpec>) -> Self {
        let system_prompt = config.effective_system_prompt();
        Self {
            ctx: ConversationContext::new(&system_prompt),
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            system_prompt,
            context_window: config.llm.context_window,
            tool_specs,
        }
    }

    pub fn context(&self) -> &ConversationContext {
        &self.ctx
    }

    pub fn turn_counter(&self) -> u64 {
        self.ctx.turn_counter()
    }

    /// Commit the user's transcript and build the first request of the turn.
    pub fn begin_user_turn(&mut self, trace_id: TraceId, text: &str) -> LlmRequest {
        self.ctx.begin_turn(trace_id);
        self.ctx.push_user(text);
        self.build_request(true)
    }

    /// Start a turn that plays a canned assistant utterance (greeting, idle
    /// prompt) with no LLM involved.
    pub fn begin_canned_turn(&mut self, trace_id: TraceId, text: &str) {
        self.ctx.begin_turn(trace_id);
        self.ctx.append_partial(text);
    }

    /// Request for the next round of the tool-calling loop. Past
    /// [`MAX_TOOL_DEPTH`] the tool surface is withdrawn, which forces the
    /// model to produce a spoken answer.
    pub fn continuation_request(&self, depth: usize) -> LlmRequest {
        self.build_request(depth < MAX_TOOL_DEPTH)
    }

    fn build_request(&self, with_tools: bool) -> LlmRequest {
        LlmRequest {
            system_prompt: self.system_prompt.clone(),
            messages: self.ctx.window(self.context_window),
            tools: if with_tools {
                self.tool_specs.clone()
            } else {
                Vec::new()
            },
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Append streamed assistant content.
    pub fn on_content(&mut self, text: &str) {
        self.ctx.append_partial(text);
    }

    /// Fold one streamed function-call slice.
    pub fn on_function_delta(&mut self, delta: &FunctionCallDelta) {
        self.ctx.absorb_function_delta(delta);
    }

    pub fn has_pending_tool_calls(&self) -> bool {
        self.ctx.has_pending_tool_calls()
    }

    /// Commit the assistant message carrying the accumulated calls.
    pub fn commit_tool_calls(&mut self) -> Vec<ToolCall> {
        self.ctx.commit_tool_calls()
    }

    /// Record one tool result in the history, as the LLM will see it.
    pub fn push_tool_outcome(&mut self, call: &ToolCall, outcome: &ToolOutcome) {
        let content = match &outcome.error {
            None => serde_json::json!({"ok": true, "result": outcome.result}).to_string(),
            Some(err) => serde_json::json!({"ok": false, "error": err}).to_string(),
        };
        self.ctx.push_tool_result(&call.id, content);
    }

    /// Commit the full partial as this turn's assistant message.
    pub fn commit_assistant(&mut self) -> Option<String> {
        self.ctx.commit_assistant()
    }

    /// Commit only what was spoken before an interrupt.
    pub fn commit_spoken(&mut self, spoken: &str) -> Option<String> {
        self.ctx.commit_spoken(spoken)
    }

    pub fn discard_partial(&mut self) {
        self.ctx.discard_partial()
    }

    /// Value snapshot of the committed history.
    pub fn snapshot(&self) -> Vec<Message> {
        self.ctx.messages().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_orchestrator_core::Role;

    fn aggregator() -> ContextAggregator {
        let mut config = ConfigSnapshot::default();
        config.llm.system_prompt = "Eres un asistente de voz.".to_string();
        config.style.tone = Some("warm".to_string());
        ContextAggregator::new(
            &config,
            vec![ToolSpec {
                name: "get_balance".to_string(),
                description: "balance".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }],
        )
    }

    #[test]
    fn test_begin_user_turn_builds_request() {
        let mut agg = aggregator();
        let request = agg.begin_user_turn(TraceId::new(), "Hola");
        assert!(request.system_prompt.contains("asistente"));
        assert!(request.system_prompt.contains("warm"));
        assert_eq!(request.messages.last().unwrap().content, "Hola");
        assert_eq!(request.tools.len(), 1);
    }

    #[test]
    fn test_tool_surface_withdrawn_at_depth_cap() {
        let mut agg = aggregator();
        agg.begin_user_turn(TraceId::new(), "Hola");
        assert_eq!(agg.continuation_request(1).tools.len(), 1);
        assert!(agg.continuation_request(MAX_TOOL_DEPTH).tools.is_empty());
    }

    #[test]
    fn test_tool_outcome_formatting() {
        let mut agg = aggregator();
        agg.begin_user_turn(TraceId::new(), "saldo?");
        agg.on_function_delta(&FunctionCallDelta {
            id: Some("call_1".to_string()),
            name: Some("get_balance".to_string()),
            arguments: "{}".to_string(),
        });
        let calls = agg.commit_tool_calls();
        agg.push_tool_outcome(
            &calls[0],
            &ToolOutcome::ok(serde_json::json!({"balance": "$10"})),
        );

        let messages = agg.snapshot();
        let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.contains("\"ok\":true"));
        assert!(tool_msg.content.contains("$10"));
    }

    #[test]
    fn test_failed_tool_outcome_is_recoverable_data() {
        let mut agg = aggregator();
        agg.begin_user_turn(TraceId::new(), "saldo?");
        agg.on_function_delta(&FunctionCallDelta {
            id: Some("call_1".to_string()),
            name: Some("get_balance".to_string()),
            arguments: "{}".to_string(),
        });
        let calls = agg.commit_tool_calls();
        agg.push_tool_outcome(&calls[0], &ToolOutcome::failed("timeout"));

        let messages = agg.snapshot();
        let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.contains("\"ok\":false"));
        assert!(tool_msg.content.contains("timeout"));
    }

    #[test]
    fn test_canned_turn_commit() {
        let mut agg = aggregator();
        agg.begin_canned_turn(TraceId::new(), "¿Sigue ahí?");
        assert_eq!(agg.commit_assistant().as_deref(), Some("¿Sigue ahí?"));
    }
}
