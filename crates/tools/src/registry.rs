//! Tool registry
//!
//! Name-keyed tool lookup with per-tool timeout enforcement. Implements the
//! pipeline's `ToolPort`: every failure mode is folded into a
//! `ToolOutcome` so the conversation can continue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use voice_orchestrator_core::{PortError, ToolOutcome, ToolPort, ToolSpec};

use crate::{Tool, ToolError};

/// Name-keyed collection of tools exposed to one call.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry with no tools; the LLM sees no function-calling surface.
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    async fn run(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        match tokio::time::timeout(self.timeout, tool.execute(arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(
                name.to_string(),
                self.timeout.as_millis() as u64,
            )),
        }
    }
}

#[async_trait]
impl ToolPort for ToolRegistry {
    async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutcome, PortError> {
        tracing::debug!(tool = name, "invoking tool");
        match self.run(name, arguments).await {
            Ok(result) => Ok(ToolOutcome::ok(result)),
            Err(err) => {
                tracing::warn!(tool = name, error = %err, "tool invocation failed");
                Ok(ToolOutcome::failed(err.to_string()))
            }
        }
    }

    fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

/// Builder for [`ToolRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    tools: Vec<Arc<dyn Tool>>,
    timeout: Option<Duration>,
}

impl RegistryBuilder {
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ToolRegistry {
        let mut tools = HashMap::new();
        for tool in self.tools {
            tools.insert(tool.name().to_string(), tool);
        }
        ToolRegistry {
            tools,
            timeout: self.timeout.unwrap_or(Duration::from_secs(10)),
        }
    }
}
