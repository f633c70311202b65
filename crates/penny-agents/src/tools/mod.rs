//! Typed tool registry for the foreground message loop.
//!
//! The LLM's tool-call payload is parsed against each tool's schema before
//! execution; results are a sum type so the loop can treat search results
//! (URLs, optional image) differently from plain text.

pub mod news;
pub mod search;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use penny_llm::ToolDefinition;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: &'static str, reason: String },

    #[error("Tool {tool} failed: {reason}")]
    Failed { tool: &'static str, reason: String },

    #[error("Tool {tool} timed out after {secs}s")]
    Timeout { tool: &'static str, secs: f64 },

    #[error("Unknown tool: {0}")]
    Unknown(String),
}

/// A search result: text plus provenance and an optional preview image.
#[derive(Debug, Clone, Default)]
pub struct SearchOutput {
    pub text: String,
    pub urls: Vec<String>,
    pub image_base64: Option<String>,
}

/// What a tool produced.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text(String),
    Search(SearchOutput),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema for the tool's parameters.
    fn schema(&self) -> serde_json::Value;

    /// Execute with already-schema-shaped arguments. Implementations parse
    /// `arguments` into their typed input and reject mismatches.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Registry keyed by tool name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions in the shape the LLM API expects.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

/// Executes tools with a per-call timeout.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        debug!(tool = name, "executing tool");
        match tokio::time::timeout(self.timeout, tool.execute(arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: tool.name(),
                secs: self.timeout.as_secs_f64(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echo the input back"
        }

        fn schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
            let text = arguments
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidArguments {
                    tool: "echo",
                    reason: "missing text".into(),
                })?;
            Ok(ToolOutput::Text(text.to_string()))
        }
    }

    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        fn description(&self) -> &'static str {
            "Never finishes"
        }

        fn schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolOutput::Text(String::new()))
        }
    }

    #[tokio::test]
    async fn registry_executes_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let executor = ToolExecutor::new(registry, Duration::from_secs(5));

        let out = executor
            .execute("echo", serde_json::json!({ "text": "hi" }))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Text(t) if t == "hi"));

        let err = executor.execute("nope", serde_json::json!({})).await;
        assert!(matches!(err, Err(ToolError::Unknown(_))));
    }

    #[tokio::test]
    async fn executor_enforces_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepyTool));
        let executor = ToolExecutor::new(registry, Duration::from_millis(20));

        let err = executor.execute("sleepy", serde_json::json!({})).await;
        assert!(matches!(err, Err(ToolError::Timeout { .. })));
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let executor = ToolExecutor::new(registry, Duration::from_secs(5));

        let err = executor.execute("echo", serde_json::json!({})).await;
        assert!(matches!(err, Err(ToolError::InvalidArguments { .. })));
    }
}
