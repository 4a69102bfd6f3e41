//! Citation registry.
//!
//! Turns the evidence gathered for a request into numbered citations,
//! finds which of them a draft actually references, and renders the
//! `*Sources*` footer appended on release.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use cairn_core::evidence::{EvidenceItem, EvidenceKind};
use cairn_verify::SOURCES_HEADING;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("marker pattern compiles"));

/// A numbered, deduplicated source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-indexed, dense, stable for one response.
    pub id: usize,
    pub kind: EvidenceKind,
    pub reference: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Which citations a draft references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationCheck {
    /// Citations exist but the text references none of them.
    pub has_uncited_claims: bool,
    /// Number of distinct valid markers.
    pub citation_count: usize,
    /// Distinct valid ids, ascending.
    pub cited_ids: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct CitationRegistry {
    citations: Vec<Citation>,
    by_reference: HashMap<String, usize>,
}

impl CitationRegistry {
    /// Dedup by exact reference, first occurrence wins.
    pub fn build(evidence: &[EvidenceItem]) -> Self {
        let mut registry = Self::default();
        for item in evidence {
            if registry.by_reference.contains_key(&item.reference) {
                continue;
            }
            let id = registry.citations.len() + 1;
            registry.by_reference.insert(item.reference.clone(), id);
            registry.citations.push(Citation {
                id,
                kind: item.kind,
                reference: item.reference.clone(),
                title: item.title.clone().unwrap_or_else(|| item.reference.clone()),
                url: item.url.clone(),
                excerpt: item.excerpt.clone(),
            });
        }
        registry
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn len(&self) -> usize {
        self.citations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    pub fn lookup(&self, reference: &str) -> Option<&Citation> {
        self.by_reference
            .get(reference)
            .and_then(|id| self.get(*id))
    }

    pub fn get(&self, id: usize) -> Option<&Citation> {
        id.checked_sub(1).and_then(|i| self.citations.get(i))
    }

    /// Citations whose ids appear in `ids`, in id order.
    pub fn select(&self, ids: &[usize]) -> Vec<Citation> {
        let wanted: BTreeSet<usize> = ids.iter().copied().collect();
        wanted.into_iter().filter_map(|id| self.get(id).cloned()).collect()
    }
}

/// Parse `[n]` markers and match them against the citation list.
pub fn detect_uncited_claims(text: &str, citations: &[Citation]) -> CitationCheck {
    let cited: BTreeSet<usize> = MARKER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<usize>().ok())
        .filter(|id| (1..=citations.len()).contains(id))
        .collect();

    CitationCheck {
        has_uncited_claims: !citations.is_empty() && cited.is_empty(),
        citation_count: cited.len(),
        cited_ids: cited.into_iter().collect(),
    }
}

/// Escape text for the transport's `<url|label>` link markup.
fn escape_label(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('|', "¦")
        .replace('\n', " ")
}

fn escape_url(url: &str) -> String {
    url.trim()
        .replace('<', "%3C")
        .replace('>', "%3E")
        .replace('|', "%7C")
        .replace(' ', "%20")
}

/// One footer line: `• [id] <url|title>`, or `• [id] title` without a url.
pub fn render_citation(citation: &Citation) -> String {
    let title = escape_label(&citation.title);
    match citation.url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => format!("• [{}] <{}|{}>", citation.id, escape_url(url), title),
        None => format!("• [{}] {}", citation.id, title),
    }
}

/// The full footer block. Empty when there is nothing to list.
pub fn render_footer(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }
    let mut footer = String::from(SOURCES_HEADING);
    for citation in citations {
        footer.push('\n');
        footer.push_str(&render_citation(citation));
    }
    footer
}
