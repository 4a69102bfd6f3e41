//! Evidence items: retrieved context that may back a citation.

use serde::{Deserialize, Serialize};

use crate::knowledge::KnowledgeHit;

/// Where a piece of evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    Thread,
    File,
    Web,
    Tool,
}

impl EvidenceKind {
    /// Map a knowledge-hit category onto a kind. Unknown categories are files.
    pub fn from_category(category: Option<&str>) -> Self {
        match category.map(str::to_ascii_lowercase).as_deref() {
            Some("thread" | "conversation" | "history") => Self::Thread,
            Some("web" | "url" | "link") => Self::Web,
            Some("tool") => Self::Tool,
            _ => Self::File,
        }
    }
}

/// One item gathered for an attempt. Read-only once gathered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub kind: EvidenceKind,

    /// Exact-match dedup key.
    pub reference: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

impl EvidenceItem {
    pub fn new(kind: EvidenceKind, reference: impl Into<String>) -> Self {
        Self {
            kind,
            reference: reference.into(),
            title: None,
            url: None,
            excerpt: None,
        }
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

impl From<KnowledgeHit> for EvidenceItem {
    fn from(hit: KnowledgeHit) -> Self {
        Self {
            kind: EvidenceKind::from_category(hit.category.as_deref()),
            reference: hit.reference,
            title: hit.title,
            url: hit.url,
            excerpt: Some(hit.content),
        }
    }
}
