//! Incremental reply events.
//!
//! `ReplyEvent`s give a front end something to show while a request is in
//! flight. Draft text is never sent: the only `Chunk` is the released
//! reply, emitted after verification passed. The [`crate::AssistantReply`]
//! returned by `run()` stays authoritative.

use cairn_core::provider::Usage;
use serde::{Deserialize, Serialize};

use crate::state::Phase;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyEvent {
    /// The loop entered a phase.
    Phase { phase: Phase, attempt: u32 },

    /// A tool is being called. `input` is the sanitized copy.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// A tool call finished.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// A draft failed verification and another attempt follows.
    Retrying { attempt: u32, issues: Vec<String> },

    /// Released text.
    Chunk { content: String },

    /// The request is complete.
    Done {
        conversation_id: String,
        verified: bool,
        attempt_count: u32,
        usage: Option<Usage>,
    },

    /// The request ended with an error.
    Error { message: String },
}

impl ReplyEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Phase { .. } => "phase",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Retrying { .. } => "retrying",
            Self::Chunk { .. } => "chunk",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_serialization() {
        let event = ReplyEvent::Phase {
            phase: Phase::Verify,
            attempt: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"phase""#));
        assert!(json.contains(r#""phase":"verify""#));
    }

    #[test]
    fn done_serialization() {
        let event = ReplyEvent::Done {
            conversation_id: "abc".into(),
            verified: true,
            attempt_count: 1,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""attempt_count":1"#));
    }

    #[test]
    fn event_type_matches_tag() {
        let events = [
            ReplyEvent::Retrying {
                attempt: 2,
                issues: vec!["no-blockquotes".into()],
            },
            ReplyEvent::ToolCall {
                id: "a".into(),
                name: "builtin__current_time".into(),
                input: serde_json::Value::Null,
            },
            ReplyEvent::Error {
                message: "boom".into(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"chunk","content":"hi"}"#;
        let event: ReplyEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, ReplyEvent::Chunk { content: "hi".into() });
    }
}
