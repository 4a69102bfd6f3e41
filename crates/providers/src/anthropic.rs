//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE, decoded into [`StreamEvent`]s by [`SseDecoder`]

use async_trait::async_trait;
use cairn_core::error::ProviderError;
use cairn_core::message::{Message, MessageToolCall, Role};
use cairn_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Anthropic puts the system prompt in a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let (system, rest): (Vec<&Message>, Vec<&Message>) =
            messages.iter().partition(|m| m.role == Role::System);
        let system = (!system.is_empty()).then(|| {
            system
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        });
        (system, rest)
    }

    /// Convert messages to API format. Consecutive tool results are merged
    /// into one user turn, as the API requires.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => result.push(AnthropicMessage {
                    role: "user".into(),
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                Role::Assistant if msg.tool_calls.is_empty() => result.push(AnthropicMessage {
                    role: "assistant".into(),
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                Role::Assistant => {
                    let mut blocks = Vec::with_capacity(msg.tool_calls.len() + 1);
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    blocks.extend(msg.tool_calls.iter().map(|tc| ContentBlock::ToolUse {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input: tc.input.clone(),
                    }));
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                Role::Tool => {
                    let block = ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                        is_error: msg.is_tool_error(),
                    };
                    match result.last_mut() {
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if *role == "user" => blocks.push(block),
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
                Role::System => {}
            }
        }

        result
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        if !request.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop);
        }
        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200 => Ok(response),
            429 => {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                Err(ProviderError::RateLimited { retry_after_secs })
            }
            401 | 403 => Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            )),
            404 => Err(ProviderError::ModelNotFound(
                body["model"].as_str().unwrap_or_default().to_string(),
            )),
            _ => {
                let message = response.text().await.unwrap_or_default();
                warn!(status, body = %message, "Anthropic API error");
                Err(ProviderError::ApiError {
                    status_code: status,
                    message,
                })
            }
        }
    }

    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(&text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(MessageToolCall { id, name, input });
                }
                ResponseContentBlock::Other => {}
            }
        }

        let mut message = Message::assistant(text_content);
        message.id = resp.id;
        message.tool_calls = tool_calls;

        ProviderResponse {
            message,
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            }),
            stop_reason: resp.stop_reason.as_deref().map(StopReason::from_wire),
            model: resp.model,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request, false);
        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let api_resp: AnthropicResponse =
            self.send(&body, false)
                .await?
                .json()
                .await
                .map_err(|e| ProviderError::ApiError {
                    status_code: 200,
                    message: format!("Failed to parse Anthropic response: {e}"),
                })?;

        Ok(Self::response_to_provider_response(api_resp))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError> {
        let body = Self::build_body(&request, true);
        debug!(provider = "anthropic", model = %request.model, tools = request.tools.len(), "Sending streaming request");

        let response = self.send(&body, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for event in decoder.push(&bytes) {
                    let failed = event.is_err();
                    // Receiver gone means the caller stopped listening
                    if tx.send(event).await.is_err() || failed {
                        return;
                    }
                }
                if decoder.is_finished() {
                    return;
                }
            }

            if !decoder.is_finished() {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(
                        "stream ended before message_stop".into(),
                    )))
                    .await;
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let body = serde_json::json!({
            "model": "claude-3-5-haiku-20241022",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });
        match self.send(&body, false).await {
            Ok(_) => Ok(true),
            Err(ProviderError::AuthenticationFailed(_)) => Ok(false),
            Err(ProviderError::Network(e)) => Err(ProviderError::Network(e)),
            // Reachable, just unhappy with this request
            Err(_) => Ok(true),
        }
    }
}

// --- SSE decoding ---

#[derive(Debug, Default)]
struct PendingToolUse {
    id: String,
    name: String,
    json: String,
}

/// Incremental decoder for the Messages API event stream.
///
/// Feed raw bytes with [`SseDecoder::push`]; complete `data:` lines are
/// turned into events. Lines may be split across chunks at any byte.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    tool: Option<PendingToolUse>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    finished: bool,
}

impl SseDecoder {
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, ProviderError>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            // `event:` lines repeat the type carried in the data payload
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() || self.finished {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(data) {
                Ok(event) => out.extend(self.handle(&event)),
                Err(e) => trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE"),
            }
        }

        out
    }

    fn handle(&mut self, event: &serde_json::Value) -> Option<Result<StreamEvent, ProviderError>> {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(input) = event["message"]["usage"]["input_tokens"].as_u64() {
                    self.usage.prompt_tokens = input as u32;
                }
                None
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.tool = Some(PendingToolUse {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        json: String::new(),
                    });
                }
                None
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => delta["text"].as_str().map(|text| {
                        Ok(StreamEvent::TextDelta {
                            text: text.to_string(),
                        })
                    }),
                    "input_json_delta" => {
                        if let (Some(tool), Some(partial)) =
                            (self.tool.as_mut(), delta["partial_json"].as_str())
                        {
                            tool.json.push_str(partial);
                        }
                        None
                    }
                    _ => None,
                }
            }
            "content_block_stop" => self.tool.take().map(|tool| {
                let input = if tool.json.trim().is_empty() {
                    Ok(serde_json::json!({}))
                } else {
                    serde_json::from_str(&tool.json)
                };
                input
                    .map(|input| StreamEvent::ToolUse {
                        id: tool.id,
                        name: tool.name.clone(),
                        input,
                    })
                    .map_err(|e| {
                        ProviderError::StreamInterrupted(format!(
                            "invalid input for tool '{}': {e}",
                            tool.name
                        ))
                    })
            }),
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(StopReason::from_wire(reason));
                }
                if let Some(output) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.completion_tokens = output as u32;
                }
                if let Some(input) = event["usage"]["input_tokens"].as_u64() {
                    self.usage.prompt_tokens = input as u32;
                }
                None
            }
            "message_stop" => {
                self.finished = true;
                self.usage.total_tokens = self.usage.prompt_tokens + self.usage.completion_tokens;
                Some(Ok(StreamEvent::Stop {
                    stop_reason: self.stop_reason.take().unwrap_or(StopReason::EndTurn),
                    usage: Some(std::mem::take(&mut self.usage)),
                }))
            }
            "error" => {
                self.finished = true;
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                Some(Err(ProviderError::StreamInterrupted(message)))
            }
            _ => None,
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(decoder: &mut SseDecoder, raw: &str) -> Vec<StreamEvent> {
        decoder
            .push(raw.as_bytes())
            .into_iter()
            .map(|e| e.unwrap())
            .collect()
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test")
            .unwrap()
            .with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn system_extraction() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::system("Be concise"),
            Message::user("Hello"),
            Message::assistant("Hi!"),
        ];

        let (system, rest) = AnthropicProvider::extract_system(&messages);
        assert_eq!(system.as_deref(), Some("You are helpful\n\nBe concise"));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].role, Role::User);
    }

    #[test]
    fn assistant_tool_use_becomes_blocks() {
        let mut msg = Message::assistant("Let me check");
        msg.tool_calls = vec![MessageToolCall {
            id: "toolu_123".into(),
            name: "weather__forecast".into(),
            input: serde_json::json!({"city": "Oslo"}),
        }];

        let api_msgs = AnthropicProvider::to_api_messages(&[&msg]);
        let json = serde_json::to_value(&api_msgs[0]).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "tool_use");
        assert_eq!(json["content"][1]["input"]["city"], "Oslo");
    }

    #[test]
    fn consecutive_tool_results_share_one_user_turn() {
        let ok = Message::tool_result("toolu_1", "sunny");
        let failed = Message::tool_error("toolu_2", "Error [timeout]");

        let api_msgs = AnthropicProvider::to_api_messages(&[&ok, &failed]);
        assert_eq!(api_msgs.len(), 1);
        let json = serde_json::to_value(&api_msgs[0]).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["tool_use_id"], "toolu_1");
        assert!(json["content"][0].get("is_error").is_none());
        assert_eq!(json["content"][1]["is_error"], true);
    }

    #[test]
    fn body_carries_tools_and_system() {
        let request = ProviderRequest {
            model: "claude-test".into(),
            messages: vec![Message::system("Be brief"), Message::user("Hi")],
            temperature: 0.2,
            max_tokens: Some(256),
            tools: vec![ToolDefinition {
                name: "builtin__current_time".into(),
                description: "Current time".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            stream: true,
            stop: vec![],
        };
        let body = AnthropicProvider::build_body(&request, true);
        assert_eq!(body["system"], "Be brief");
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!(body.get("stop_sequences").is_none());
    }

    #[test]
    fn parse_tool_use_response() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "id": "msg_02",
                "model": "claude-sonnet-4-20250514",
                "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": "Let me check"},
                    {"type": "tool_use", "id": "toolu_abc", "name": "weather__forecast", "input": {"city": "Oslo"}}
                ],
                "usage": {"input_tokens": 20, "output_tokens": 10},
                "stop_reason": "tool_use"
            }"#,
        )
        .unwrap();

        let pr = AnthropicProvider::response_to_provider_response(resp);
        assert_eq!(pr.message.content, "Let me check");
        assert_eq!(pr.message.tool_calls[0].input["city"], "Oslo");
        assert_eq!(pr.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(pr.usage.unwrap().total_tokens, 30);
    }

    #[test]
    fn sse_text_and_stop() {
        let mut decoder = SseDecoder::default();
        let out = events(
            &mut decoder,
            concat!(
                "event: message_start\n",
                "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":12}}}\n\n",
                "event: content_block_delta\n",
                "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"It is \"}}\n\n",
                "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"sunny [1].\"}}\n\n",
                "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":5}}\n\n",
                "data: {\"type\":\"message_stop\"}\n\n",
            ),
        );

        assert_eq!(out.len(), 3);
        assert_eq!(out[0], StreamEvent::TextDelta { text: "It is ".into() });
        assert_eq!(
            out[2],
            StreamEvent::Stop {
                stop_reason: StopReason::EndTurn,
                usage: Some(Usage {
                    prompt_tokens: 12,
                    completion_tokens: 5,
                    total_tokens: 17
                })
            }
        );
        assert!(decoder.is_finished());
    }

    #[test]
    fn sse_tool_use_assembled_across_chunks() {
        let mut decoder = SseDecoder::default();
        let raw = concat!(
            "data: {\"type\":\"content_block_start\",\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"weather__forecast\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"city\\\":\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"Oslo\\\"}\"}}\n",
            "data: {\"type\":\"content_block_stop\"}\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"}}\n",
            "data: {\"type\":\"message_stop\"}\n",
        );
        // Split mid-line to exercise buffering
        let (a, b) = raw.split_at(57);
        let mut out = events(&mut decoder, a);
        out.extend(events(&mut decoder, b));

        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0],
            StreamEvent::ToolUse {
                id: "toolu_1".into(),
                name: "weather__forecast".into(),
                input: serde_json::json!({"city": "Oslo"}),
            }
        );
        assert!(matches!(
            out[1],
            StreamEvent::Stop { stop_reason: StopReason::ToolUse, .. }
        ));
    }

    #[test]
    fn sse_multibyte_split_is_preserved() {
        let mut decoder = SseDecoder::default();
        let raw = "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"é\"}}\n";
        let bytes = raw.as_bytes();
        let split = raw.find('é').unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        let out = decoder.push(&bytes[split..]);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].as_ref().unwrap(),
            &StreamEvent::TextDelta { text: "é".into() }
        );
    }

    #[test]
    fn sse_error_event_interrupts() {
        let mut decoder = SseDecoder::default();
        let out = decoder.push(
            b"data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n",
        );
        assert!(matches!(
            &out[0],
            Err(ProviderError::StreamInterrupted(m)) if m == "Overloaded"
        ));
        assert!(decoder.is_finished());
    }

    #[test]
    fn sse_tool_without_input_gets_empty_object() {
        let mut decoder = SseDecoder::default();
        let out = events(
            &mut decoder,
            concat!(
                "data: {\"type\":\"content_block_start\",\"content_block\":{\"type\":\"tool_use\",\"id\":\"t\",\"name\":\"builtin__current_time\"}}\n",
                "data: {\"type\":\"content_block_stop\"}\n",
            ),
        );
        assert!(matches!(&out[0], StreamEvent::ToolUse { input, .. } if input == &serde_json::json!({})));
    }
}
