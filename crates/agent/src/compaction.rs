//! Context compaction.
//!
//! When the history no longer fits comfortably in the context window, the
//! older part is replaced by one summary message and the last
//! `keep_last_n` messages stay verbatim. Any failure leaves the history
//! untouched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cairn_config::CompactionConfig;
use cairn_core::error::ProviderError;
use cairn_core::message::{Message, Role};
use cairn_core::provider::{Provider, ProviderRequest};
use tracing::{debug, info, warn};

/// Metadata key set on the synthetic summary message.
pub const SUMMARY_METADATA_KEY: &str = "compaction_summary";

/// Instructions given to the summarizer.
pub const SUMMARY_PROMPT: &str = "\
Summarize the conversation below so it can replace the original messages. \
Use exactly these sections, each a short bullet list (write \"None\" if empty):

## Preferences
What the user likes, dislikes or asked you to keep doing.

## Facts & Decisions
Facts established and decisions made.

## Open Items
Questions or tasks that are still unresolved.

## Key Context
Anything else needed to continue the conversation naturally.";

/// Estimate tokens for a string: one token per four characters, rounded up.
///
/// Deliberately rough; the trigger ratio leaves room for the error.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub fn estimate_history_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

/// Slack for products like `100.0 * 0.29` landing just under the integer.
const THRESHOLD_EPSILON: f64 = 1e-6;

/// Largest estimate that does not trigger compaction: `floor(limit * ratio)`.
pub fn compaction_threshold(limit: usize, ratio: f64) -> usize {
    (limit as f64 * ratio + THRESHOLD_EPSILON).floor() as usize
}

/// True iff `estimate` strictly exceeds `limit * ratio`.
pub fn should_compact(estimate: usize, limit: usize, ratio: f64) -> bool {
    estimate > compaction_threshold(limit, ratio)
}

/// Produces the summary text for a transcript.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String, ProviderError>;
}

/// Summarizer backed by the completion provider.
pub struct ProviderSummarizer {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
}

impl ProviderSummarizer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: 1024,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String, ProviderError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![Message::system(SUMMARY_PROMPT), Message::user(transcript)],
            temperature: 0.0,
            max_tokens: Some(self.max_tokens),
            tools: vec![],
            stream: false,
            stop: vec![],
        };
        let response = self.provider.complete(request).await?;
        Ok(response.message.content)
    }
}

/// Outcome of one compaction. Consumed immediately by the loop.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub compacted_history: Vec<Message>,
    pub summary: Option<String>,
    pub original_token_estimate: usize,
    pub compacted_token_estimate: usize,
    pub applied: bool,
}

impl CompactionResult {
    fn unchanged(history: &[Message], estimate: usize) -> Self {
        Self {
            compacted_history: history.to_vec(),
            summary: None,
            original_token_estimate: estimate,
            compacted_token_estimate: estimate,
            applied: false,
        }
    }
}

fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let speaker = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => "System",
                Role::Tool => "Tool",
            };
            format!("{speaker}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The synthetic message that stands in for the summarized turns.
pub fn summary_message(summary: &str) -> Message {
    let mut message = Message::user(format!(
        "[Summary of the earlier conversation]\n{}",
        summary.trim()
    ));
    message
        .metadata
        .insert(SUMMARY_METADATA_KEY.into(), serde_json::Value::Bool(true));
    message
}

/// Summarize everything but the last `keep_last_n` messages.
///
/// Never fails: a summarizer error, timeout or empty summary returns the
/// original history with `applied: false`.
pub async fn compact(
    history: &[Message],
    keep_last_n: usize,
    summarizer: &dyn Summarizer,
    timeout: Duration,
) -> CompactionResult {
    let original = estimate_history_tokens(history);
    if history.len() <= keep_last_n {
        debug!(messages = history.len(), keep_last_n, "Nothing old enough to compact");
        return CompactionResult::unchanged(history, original);
    }

    let (older, tail) = history.split_at(history.len() - keep_last_n);
    let summary = match tokio::time::timeout(timeout, summarizer.summarize(&transcript(older))).await
    {
        Ok(Ok(summary)) if !summary.trim().is_empty() => summary,
        Ok(Ok(_)) => {
            warn!("Summarizer returned an empty summary, keeping full history");
            return CompactionResult::unchanged(history, original);
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Summarizer failed, keeping full history");
            return CompactionResult::unchanged(history, original);
        }
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "Summarizer timed out, keeping full history");
            return CompactionResult::unchanged(history, original);
        }
    };

    let mut compacted = Vec::with_capacity(tail.len() + 1);
    compacted.push(summary_message(&summary));
    compacted.extend_from_slice(tail);
    let compacted_estimate = estimate_history_tokens(&compacted);

    info!(
        summarized = older.len(),
        kept = tail.len(),
        original_tokens = original,
        compacted_tokens = compacted_estimate,
        "History compacted"
    );

    CompactionResult {
        compacted_history: compacted,
        summary: Some(summary),
        original_token_estimate: original,
        compacted_token_estimate: compacted_estimate,
        applied: true,
    }
}

/// Compaction settings bound to a summarizer.
pub struct Compactor {
    summarizer: Arc<dyn Summarizer>,
    context_limit_tokens: usize,
    trigger_ratio: f64,
    keep_last_n: usize,
    timeout: Duration,
}

impl Compactor {
    pub fn new(summarizer: Arc<dyn Summarizer>, config: &CompactionConfig) -> Self {
        Self {
            summarizer,
            context_limit_tokens: config.context_limit_tokens,
            trigger_ratio: config.trigger_ratio,
            keep_last_n: config.keep_last_n,
            timeout: Duration::from_secs(config.summarizer_timeout_secs),
        }
    }

    pub fn needs_compaction(&self, history: &[Message]) -> bool {
        should_compact(
            estimate_history_tokens(history),
            self.context_limit_tokens,
            self.trigger_ratio,
        )
    }

    pub async fn compact(&self, history: &[Message]) -> CompactionResult {
        compact(history, self.keep_last_n, self.summarizer.as_ref(), self.timeout).await
    }
}
