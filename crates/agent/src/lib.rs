//! The request-handling core of the cairn assistant.
//!
//! Every user message goes through a **Gather → Act → Verify** cycle:
//!
//! 1. **Gather**: compact the history if it is over budget, collect
//!    evidence from the caller and knowledge lookups, number it as citations
//! 2. **Act**: stream a draft from the completion provider, serving tool
//!    calls through the gateway inside the same turn
//! 3. **Verify**: score the draft against the rule engine
//! 4. **Release** a passing draft with its `*Sources*` footer, or retry with
//!    the rule feedback; after the last attempt return a fixed failure reply
//!
//! Nothing a caller treats as final ever skips verification.

pub mod citations;
pub mod compaction;
pub mod loop_runner;
pub mod prompt;
pub mod state;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use citations::{Citation, CitationCheck, CitationRegistry, detect_uncited_claims, render_footer};
pub use compaction::{
    CompactionResult, Compactor, ProviderSummarizer, Summarizer, compact, compaction_threshold,
    estimate_tokens, should_compact,
};
pub use loop_runner::{AssistantLoop, AssistantReply, PhaseCallback, RunContext, health_thresholds};
pub use prompt::GRACEFUL_FAILURE_MESSAGE;
pub use state::{AttemptContext, LoopState, MAX_ATTEMPTS, Phase, StateMachine};
pub use stream_event::ReplyEvent;
