//! In-process tool provider.
//!
//! Wraps a set of [`Tool`] implementations so they can sit in the catalog
//! next to remote providers and go through the same gateway.

use async_trait::async_trait;
use cairn_core::error::ToolError;
use cairn_core::provider::ToolDefinition;
use cairn_core::tool::{Tool, ToolProvider};
use serde_json::Value;
use std::collections::BTreeMap;

pub struct LocalToolProvider {
    name: String,
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl LocalToolProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Box::new(tool));
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolProvider for LocalToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(self.tools.values().map(|t| t.to_definition()).collect())
    }

    async fn call_tool(&self, name: &str, input: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
            arguments
                .get("text")
                .cloned()
                .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))
        }
    }

    #[tokio::test]
    async fn lists_and_calls_registered_tools() {
        let provider = LocalToolProvider::new("local").with_tool(EchoTool);
        assert_eq!(provider.len(), 1);

        let defs = provider.list_tools().await.unwrap();
        assert_eq!(defs[0].name, "echo");

        let out = provider
            .call_tool("echo", serde_json::json!({"text": "hello world"}))
            .await
            .unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn missing_tool_is_not_found() {
        let provider = LocalToolProvider::new("local");
        let err = provider
            .call_tool("nonexistent", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
        assert!(!err.is_retryable());
    }
}
