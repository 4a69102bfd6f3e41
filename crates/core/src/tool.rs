//! Tool traits: the abstraction over external capabilities.
//!
//! A [`ToolProvider`] is an independently failing source of tools whose
//! schemas are discovered at runtime. In-process capabilities implement the
//! smaller [`Tool`] trait and are wrapped in a provider by `cairn-tools`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Separator between provider and tool name in the name the model sees.
pub const QUALIFIED_NAME_SEPARATOR: &str = "__";

/// Identity of a discovered tool: which provider serves it, and its name there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolKey {
    pub provider: String,
    pub name: String,
}

impl ToolKey {
    pub fn new(provider: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            name: name.into(),
        }
    }

    /// The name offered to the completion provider, e.g. `weather__forecast`.
    pub fn qualified(&self) -> String {
        format!("{}{}{}", self.provider, QUALIFIED_NAME_SEPARATOR, self.name)
    }

    /// Inverse of [`ToolKey::qualified`]. Splits on the first separator.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (provider, name) = qualified.split_once(QUALIFIED_NAME_SEPARATOR)?;
        if provider.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(provider, name))
    }
}

impl fmt::Display for ToolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.name)
    }
}

/// A single in-process capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool within its provider.
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A source of tools discovered at runtime.
///
/// Both discovery and invocation may fail independently per provider;
/// the health tracker keys its state by [`ToolProvider::name`].
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Provider identity (e.g., "weather", "calendar").
    fn name(&self) -> &str;

    /// Discover the tools this provider currently serves.
    async fn list_tools(&self) -> std::result::Result<Vec<ToolDefinition>, ToolError>;

    /// Invoke one tool by its unqualified name.
    async fn call_tool(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;
}
