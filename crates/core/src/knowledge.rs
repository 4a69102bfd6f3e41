//! Knowledge trait for keyword-searchable lookups over long-term context.
//!
//! Preferences, past threads and reference documents live outside this
//! workspace; the loop only needs `search(query) -> hits`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::KnowledgeError;

/// A single lookup result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeHit {
    /// Stable reference string (used for citation dedup)
    pub reference: String,

    /// The retrieved text
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Free-form category ("thread", "file", "web", "preference", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl KnowledgeHit {
    pub fn new(reference: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            content: content.into(),
            title: None,
            url: None,
            category: None,
            tags: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
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

/// A keyword-searchable knowledge collaborator.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Name used in logs (e.g., "preferences", "threads").
    fn name(&self) -> &str;

    /// Return at most `limit` hits for the query, best first.
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<KnowledgeHit>, KnowledgeError>;
}
