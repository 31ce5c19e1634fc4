//! Tools callable by the LLM during a conversation
//!
//! A [`Tool`] is a named, schema-described operation the model may invoke
//! mid-turn. The [`ToolRegistry`] implements the pipeline's `ToolPort`:
//! lookup, argument validation, timeout enforcement, and error-to-data
//! conversion (a failing tool becomes a tool response the model can recover
//! from, never a pipeline failure).

mod registry;

pub use registry::{RegistryBuilder, ToolRegistry};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use voice_orchestrator_core::ToolSpec;

/// Tool execution errors
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool '{0}' timed out after {1}ms")]
    Timeout(String, u64),
}

/// A tool the LLM can call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object
    fn parameters(&self) -> Value;

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError>;

    /// Schema form handed to the LLM
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Tool that returns a canned value. Useful for demos and for declaring
/// tools whose real execution happens on an external system the call
/// config points at.
pub struct StaticTool {
    name: String,
    description: String,
    parameters: Value,
    response: Value,
}

impl StaticTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        response: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            response,
        }
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
        Ok(self.response.clone())
    }
}

/// Tool declared by call configuration without a bound executor. Its schema
/// is exposed to the LLM; invoking it yields a recoverable failure, so a
/// deployment that declares tools it has not wired degrades conversationally
/// instead of crashing the turn.
pub struct DeclaredTool {
    spec: ToolSpec,
}

impl DeclaredTool {
    pub fn from_spec(spec: ToolSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Tool for DeclaredTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> Value {
        self.spec.parameters.clone()
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
        Err(ToolError::ExecutionFailed(format!(
            "no executor bound for tool '{}'",
            self.spec.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_declared_tool_fails_recoverably() {
        let tool = DeclaredTool::from_spec(ToolSpec {
            name: "crm_lookup".to_string(),
            description: "external lookup".to_string(),
            parameters: json!({"type": "object"}),
        });
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("crm_lookup"));
    }

    #[tokio::test]
    async fn test_static_tool() {
        let tool = StaticTool::new(
            "get_balance",
            "Look up the account balance",
            json!({"type": "object", "properties": {"id": {"type": "integer"}}}),
            json!({"balance": "$123.45"}),
        );
        assert_eq!(tool.name(), "get_balance");
        let out = tool.execute(json!({"id": 42})).await.unwrap();
        assert_eq!(out["balance"], "$123.45");

        let spec = tool.spec();
        assert_eq!(spec.name, "get_balance");
        assert!(spec.parameters["properties"]["id"].is_object());
    }
}
