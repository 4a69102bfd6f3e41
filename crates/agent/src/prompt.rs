//! Prompt assembly and the fixed user-facing texts.

use crate::citations::Citation;
use cairn_tools::sanitize::truncate;

/// Longest excerpt placed in the prompt per citation.
const MAX_EXCERPT_CHARS: usize = 600;

/// Returned when every attempt failed verification.
pub const GRACEFUL_FAILURE_MESSAGE: &str = "\
I'm sorry, I couldn't put together an answer I can stand behind this time.

You could try:
• Rephrasing the question
• Adding a bit more detail about what you need
• Splitting it into smaller, separate questions";

/// Format the numbered evidence block for the system prompt.
pub fn format_evidence(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }

    let mut block = String::from(
        "\n\n## Sources\nCite a source inline by its number, like [1]. \
         Only use the numbers listed here.\n",
    );
    for c in citations {
        block.push_str(&format!("[{}] ({}) {}", c.id, kind_label(c), c.title));
        if let Some(excerpt) = &c.excerpt {
            block.push_str(": ");
            block.push_str(&truncate(excerpt, MAX_EXCERPT_CHARS));
        }
        block.push('\n');
    }
    block
}

fn kind_label(c: &Citation) -> &'static str {
    match c.kind {
        cairn_core::EvidenceKind::Thread => "thread",
        cairn_core::EvidenceKind::File => "file",
        cairn_core::EvidenceKind::Web => "web",
        cairn_core::EvidenceKind::Tool => "tool",
    }
}

/// The explicit fix-these-issues instruction for a retry.
pub fn format_feedback(feedback: &str, attempt: u32) -> String {
    format!(
        "\n\n## Fix these issues\nYour previous draft was rejected (attempt {attempt} follows). \
         Write a new answer that fixes each named issue:\n{feedback}\n"
    )
}

/// Full system prompt for one attempt.
pub fn build_system_prompt(base: &str, citations: &[Citation], feedback: Option<(&str, u32)>) -> String {
    let mut prompt = base.to_string();
    prompt.push_str(&format_evidence(citations));
    if let Some((feedback, attempt)) = feedback {
        prompt.push_str(&format_feedback(feedback, attempt));
    }
    prompt
}

/// Note appended to a released reply when tool providers were left out.
pub fn unavailability_note(providers: &[String]) -> Option<String> {
    match providers {
        [] => None,
        [one] => Some(format!(
            "_Note: the {one} integration is temporarily unavailable, so this answer may be incomplete._"
        )),
        [rest @ .., last] => Some(format!(
            "_Note: the {} and {last} integrations are temporarily unavailable, so this answer may be incomplete._",
            rest.join(", ")
        )),
    }
}
