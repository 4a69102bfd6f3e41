//! Data model for request traces and spans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// Top-level request (user message → final reply).
    Turn,
    /// One loop phase (gather, act, verify).
    Phase,
    /// A completion provider call.
    LlmCall,
    /// A tool execution.
    ToolExecution,
    /// One verification pass.
    Verification,
    /// A history compaction.
    Compaction,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Turn => write!(f, "turn"),
            Self::Phase => write!(f, "phase"),
            Self::LlmCall => write!(f, "llm_call"),
            Self::ToolExecution => write!(f, "tool_execution"),
            Self::Verification => write!(f, "verification"),
            Self::Compaction => write!(f, "compaction"),
        }
    }
}

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub kind: SpanKind,
    /// Human-readable label (e.g. tool name, phase name).
    pub label: String,
    /// Attempt this span belongs to, if any.
    pub attempt: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Input tokens consumed (for LLM calls).
    pub input_tokens: Option<u32>,
    /// Output tokens produced (for LLM calls).
    pub output_tokens: Option<u32>,
    pub success: Option<bool>,
    /// Arbitrary metadata.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    /// Create a new span with the given kind and label.
    pub fn new(kind: SpanKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            attempt: None,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            input_tokens: None,
            output_tokens: None,
            success: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark the span as ended with the given success status.
    pub fn end(&mut self, success: bool) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_ms = Some(
            now.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.success = Some(success);
    }

    /// End with an externally measured duration.
    pub fn end_with_duration(&mut self, success: bool, duration_ms: u64) {
        self.end(success);
        self.duration_ms = Some(duration_ms);
    }

    /// Record token usage.
    pub fn record_tokens(&mut self, input: u32, output: u32) {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
    }

    /// Total tokens (input + output), or 0 if not recorded.
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// All spans for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub conversation_id: String,
    pub spans: Vec<Span>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Trace {
    /// Create a new trace for a conversation.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            spans: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn add_span(&mut self, span: Span) {
        self.spans.push(span);
    }

    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Total tokens across all spans.
    pub fn total_tokens(&self) -> u32 {
        self.spans.iter().map(|s| s.total_tokens()).sum()
    }

    pub fn count(&self, kind: SpanKind) -> usize {
        self.spans.iter().filter(|s| s.kind == kind).count()
    }
}

// ── Usage snapshot ────────────────────────────────────────────────────────

/// Running totals since the engine was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_llm_calls: u64,
    pub total_tool_executions: u64,
    pub failed_tool_executions: u64,
    pub total_verifications: u64,
    pub failed_verifications: u64,
    pub total_compactions: u64,
}
