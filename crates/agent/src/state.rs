//! Request state machine and per-attempt bookkeeping.
//!
//! ```text
//! Gathering ──▶ Drafting ──▶ Verifying ──▶ Released
//!                  ▲             │
//!                  └─ Retrying ◀─┤
//!                                └──────▶ Failed
//! ```
//!
//! Text leaves the loop only from `Released`; every other path ends in the
//! fixed failure reply or an error.

use cairn_core::error::Error;
use cairn_verify::VerificationResult;
use serde::{Deserialize, Serialize};

/// Attempts per request, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Gathering,
    Drafting,
    Verifying,
    Retrying,
    Released,
    Failed,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Failed)
    }

    pub fn can_transition_to(self, next: LoopState) -> bool {
        use LoopState::*;
        match (self, next) {
            (Gathering, Drafting)
            | (Drafting, Verifying)
            | (Verifying, Released | Retrying | Failed)
            | (Retrying, Drafting) => true,
            // Cancellation and provider errors abort from any live state
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Gathering => "gathering",
            Self::Drafting => "drafting",
            Self::Verifying => "verifying",
            Self::Retrying => "retrying",
            Self::Released => "released",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks the current state and rejects illegal moves.
#[derive(Debug)]
pub struct StateMachine {
    state: LoopState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: LoopState::Gathering,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn advance(&mut self, next: LoopState) -> Result<(), Error> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "illegal loop transition {} -> {next}",
                self.state
            )));
        }
        tracing::trace!(from = %self.state, to = %next, "Loop state");
        self.state = next;
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress markers reported to the phase callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Gather,
    Act,
    Tool,
    Verify,
    Final,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gather => "gather",
            Self::Act => "act",
            Self::Tool => "tool",
            Self::Verify => "verify",
            Self::Final => "final",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request retry state. Never shared between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    pub attempt_number: u32,
    pub verification_feedback: Option<String>,
    pub previous_issue_count: Option<usize>,
}

impl AttemptContext {
    pub fn new() -> Self {
        Self {
            attempt_number: 1,
            verification_feedback: None,
            previous_issue_count: None,
        }
    }

    pub fn is_last(&self) -> bool {
        self.attempt_number >= MAX_ATTEMPTS
    }

    /// Fold a failed verification into the next attempt.
    ///
    /// Returns `false` once the attempt budget is spent.
    pub fn record_failure(&mut self, result: &VerificationResult) -> bool {
        if self.is_last() {
            return false;
        }
        self.attempt_number += 1;
        self.verification_feedback = Some(result.feedback());
        self.previous_issue_count = Some(result.issues.len());
        true
    }
}

impl Default for AttemptContext {
    fn default() -> Self {
        Self::new()
    }
}
