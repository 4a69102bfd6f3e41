//! Provider trait: the abstraction over completion backends.
//!
//! A Provider takes a system prompt, messages and tool schemas, and answers
//! either with a complete response or with a stream of [`StreamEvent`]s:
//! text deltas, tool-invocation requests, and one terminal stop event.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,

    /// The conversation messages (system messages first)
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name as the model sees it
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Why the provider ended a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    /// Parse a provider wire value ("end_turn", "tool_use", ...).
    pub fn from_wire(value: &str) -> Self {
        match value {
            "end_turn" => Self::EndTurn,
            "tool_use" => Self::ToolUse,
            "max_tokens" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message (text plus any tool calls)
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Why generation stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single event in a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial text.
    TextDelta { text: String },

    /// The model asks for a tool invocation. `id` correlates the result.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Terminal event for the turn.
    Stop {
        stop_reason: StopReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

/// Receiving half of a provider stream.
pub type EventStream = mpsc::Receiver<std::result::Result<StreamEvent, ProviderError>>;

/// The core Provider trait.
///
/// The loop calls `stream()`; the summarizer calls `complete()`. Providers
/// that cannot stream only implement `complete()` and inherit a `stream()`
/// that replays the complete response as events.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of events.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<EventStream, ProviderError> {
        let response = self.complete(request).await?;
        let events = response_to_events(response);
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.send(Ok(event)).await;
        }
        Ok(rx)
    }

    /// Can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

/// Flatten a complete response into the event sequence a stream would carry.
pub fn response_to_events(response: ProviderResponse) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if !response.message.content.is_empty() {
        events.push(StreamEvent::TextDelta {
            text: response.message.content,
        });
    }
    let has_tool_calls = !response.message.tool_calls.is_empty();
    for call in response.message.tool_calls {
        events.push(StreamEvent::ToolUse {
            id: call.id,
            name: call.name,
            input: call.input,
        });
    }
    let stop_reason = response.stop_reason.unwrap_or(if has_tool_calls {
        StopReason::ToolUse
    } else {
        StopReason::EndTurn
    });
    events.push(StreamEvent::Stop {
        stop_reason,
        usage: response.usage,
    });
    events
}
