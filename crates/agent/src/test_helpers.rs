//! Shared test helpers.

use cairn_core::error::ProviderError;
use cairn_core::message::{Message, MessageToolCall};
use cairn_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use std::sync::Mutex;

/// A mock provider that replays scripted outcomes in order.
///
/// Once the script runs out the last outcome repeats, so a provider that
/// always fails verification needs a single entry.
pub struct ScriptedProvider {
    script: Vec<Result<ProviderResponse, ProviderError>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        assert!(!script.is_empty(), "ScriptedProvider needs at least one response");
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Plain text replies, one per call.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(text_response(t))).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.len().min(self.script.len() - 1);
        requests.push(request);
        self.script[index].clone()
    }
}

/// A text response (no tool calls).
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        stop_reason: None,
        model: "mock-model".into(),
    }
}

/// A response that only requests tools.
pub fn tool_call_response(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
    let mut response = text_response("");
    response.message.tool_calls = tool_calls;
    response
}

pub fn tool_call(id: &str, name: &str, input: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        input,
    }
}
