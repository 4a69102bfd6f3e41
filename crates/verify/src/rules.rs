//! The canonical rule set.
//!
//! Each rule looks at one property of a draft and either passes silently or
//! returns feedback phrased as an instruction the model can act on.

use std::sync::LazyLock;

use cairn_core::evidence::EvidenceItem;
use cairn_core::text::{is_stopword, significant_keywords};
use regex_lite::Regex;

use crate::model::Severity;

/// What a rule gets to look at besides the draft itself.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub user_message: &'a str,
    pub evidence: &'a [EvidenceItem],
}

/// A single verification rule. Rules must be pure: same input, same output.
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn severity(&self) -> Severity;

    /// `None` when the rule passes, otherwise feedback for the retry prompt.
    fn check(&self, text: &str, ctx: &RuleContext<'_>) -> Option<String>;
}

/// `**text**` used as emphasis: flanked by non-space inside and not glued
/// to a preceding word, so `x ** 2` and `x**2` are left alone.
static BOLD_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w*])\*\*[^*\s](?:[^*\n]*[^*\s])?\*\*").expect("bold pattern compiles")
});

static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\]\n]+\]\((?:https?://|mailto:)[^)\s]*\)").expect("link pattern compiles")
});

static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d+\]").expect("marker pattern compiles"));

static STRONG_CLAIM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:1[89]\d{2}|20\d{2})\b",
        r"|\d+(?:\.\d+)?\s?%",
        r"|[$€£]\s?\d",
        r"|\b\d+(?:\.\d+)?\s?(?:dollars|euros|pounds|usd|eur|gbp)\b",
        r"|\b(?:according to|reported by|research shows|studies show|data shows|as stated by)\b",
    ))
    .expect("claim pattern compiles")
});

static ABSOLUTE_LANGUAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:always|never|guaranteed|definitely|certainly|absolutely)\b|\b100\s?%")
        .expect("absolute pattern compiles")
});

/// Footer heading written by the citation renderer.
pub const SOURCES_HEADING: &str = "*Sources*";

/// Build every rule in canonical order.
pub fn canonical_rules(min_length_cap: usize) -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(NotEmpty),
        Box::new(MinimumLength { cap: min_length_cap }),
        Box::new(NoIllegalBoldMarkup),
        Box::new(NoIllegalLinkMarkup),
        Box::new(NoBlockquotes),
        Box::new(AddressesQuestion),
        Box::new(CitesSources),
        Box::new(ResponseCoherence),
        Box::new(FactualClaimCheck),
    ]
}

pub struct NotEmpty;

impl Rule for NotEmpty {
    fn name(&self) -> &str {
        "not-empty"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn check(&self, text: &str, _ctx: &RuleContext<'_>) -> Option<String> {
        text.trim()
            .is_empty()
            .then(|| "The response is empty. Answer the user's question directly.".to_string())
    }
}

/// Draft must be at least `min(len(user_message), cap)` characters.
pub struct MinimumLength {
    pub cap: usize,
}

impl Rule for MinimumLength {
    fn name(&self) -> &str {
        "minimum-length"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn check(&self, text: &str, ctx: &RuleContext<'_>) -> Option<String> {
        let required = ctx.user_message.chars().count().min(self.cap);
        let actual = text.trim().chars().count();
        (actual < required).then(|| {
            format!(
                "The response is very short ({actual} characters, expected at least {required}). Give a more complete answer."
            )
        })
    }
}

pub struct NoIllegalBoldMarkup;

impl Rule for NoIllegalBoldMarkup {
    fn name(&self) -> &str {
        "no-illegal-bold-markup"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn check(&self, text: &str, _ctx: &RuleContext<'_>) -> Option<String> {
        BOLD_MARKUP.is_match(text).then(|| {
            "Do not use **double asterisks** for bold. Use *single asterisks* instead.".to_string()
        })
    }
}

pub struct NoIllegalLinkMarkup;

impl Rule for NoIllegalLinkMarkup {
    fn name(&self) -> &str {
        "no-illegal-link-markup"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn check(&self, text: &str, _ctx: &RuleContext<'_>) -> Option<String> {
        MARKDOWN_LINK.is_match(text).then(|| {
            "Do not use [text](url) links. Write links as <url|text> or a plain URL.".to_string()
        })
    }
}

pub struct NoBlockquotes;

impl Rule for NoBlockquotes {
    fn name(&self) -> &str {
        "no-blockquotes"
    }
    fn severity(&self) -> Severity {
        Severity::Error
    }
    fn check(&self, text: &str, _ctx: &RuleContext<'_>) -> Option<String> {
        text.lines()
            .any(|line| line.trim_start().starts_with('>'))
            .then(|| "Do not start lines with '>'. Quote text inline instead.".to_string())
    }
}

/// At least one significant keyword of the question appears in the draft.
pub struct AddressesQuestion;

impl Rule for AddressesQuestion {
    fn name(&self) -> &str {
        "addresses-question"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn check(&self, text: &str, ctx: &RuleContext<'_>) -> Option<String> {
        let keywords = significant_keywords(ctx.user_message);
        if keywords.is_empty() {
            return None;
        }
        let lowered = text.to_lowercase();
        if keywords.iter().any(|k| lowered.contains(k.as_str())) {
            return None;
        }
        let shown: Vec<&str> = keywords.iter().take(5).map(String::as_str).collect();
        Some(format!(
            "The response may not address the question. Make sure it covers: {}.",
            shown.join(", ")
        ))
    }
}

/// Strong factual claims need a citation when evidence exists.
pub struct CitesSources;

impl Rule for CitesSources {
    fn name(&self) -> &str {
        "cites-sources"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn check(&self, text: &str, ctx: &RuleContext<'_>) -> Option<String> {
        if ctx.evidence.is_empty() || !STRONG_CLAIM.is_match(text) {
            return None;
        }
        if CITATION_MARKER.is_match(text) || text.contains(SOURCES_HEADING) {
            return None;
        }
        Some(
            "The response makes specific factual claims without citing sources. Add [n] markers for the sources you used."
                .to_string(),
        )
    }
}

/// Flags fragmented prose and verbatim phrase repetition.
pub struct ResponseCoherence;

const SHORT_SENTENCE_CHARS: usize = 10;

impl ResponseCoherence {
    fn sentences(text: &str) -> Vec<&str> {
        text.split(['.', '!', '?', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn repeated_phrase(text: &str) -> Option<String> {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();
        if words.len() < 6 {
            return None;
        }
        for i in 0..=words.len() - 3 {
            let phrase = &words[i..i + 3];
            let meaningful = phrase
                .iter()
                .any(|w| w.chars().count() > 3 && !is_stopword(w));
            if !meaningful {
                continue;
            }
            let repeats = (i + 3..=words.len() - 3).any(|j| words[j..j + 3] == *phrase);
            if repeats {
                return Some(phrase.join(" "));
            }
        }
        None
    }
}

impl Rule for ResponseCoherence {
    fn name(&self) -> &str {
        "response-coherence"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn check(&self, text: &str, _ctx: &RuleContext<'_>) -> Option<String> {
        let sentences = Self::sentences(text);
        if sentences.len() >= 3 {
            let short = sentences
                .iter()
                .filter(|s| s.chars().count() < SHORT_SENTENCE_CHARS)
                .count();
            if short * 2 > sentences.len() {
                return Some(
                    "Most sentences are fragments. Write complete, connected sentences."
                        .to_string(),
                );
            }
        }
        Self::repeated_phrase(text).map(|phrase| {
            format!("The phrase \"{phrase}\" is repeated. Remove the repetition.")
        })
    }
}

/// Absolute language without any gathered evidence to back it.
pub struct FactualClaimCheck;

impl Rule for FactualClaimCheck {
    fn name(&self) -> &str {
        "factual-claim-check"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn check(&self, text: &str, ctx: &RuleContext<'_>) -> Option<String> {
        if !ctx.evidence.is_empty() {
            return None;
        }
        ABSOLUTE_LANGUAGE.find(text).map(|m| {
            format!(
                "The response uses absolute language (\"{}\") without supporting sources. Soften the claim or qualify it.",
                m.as_str()
            )
        })
    }
}
