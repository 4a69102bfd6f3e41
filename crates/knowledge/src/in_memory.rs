//! In-memory knowledge source with keyword-overlap scoring.

use async_trait::async_trait;
use cairn_core::error::KnowledgeError;
use cairn_core::knowledge::{KnowledgeHit, KnowledgeSource};
use cairn_core::text::significant_keywords;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Stores hits in a Vec and ranks them by how many query keywords they contain.
pub struct InMemoryKnowledge {
    name: String,
    entries: Arc<RwLock<Vec<KnowledgeHit>>>,
}

impl InMemoryKnowledge {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_hits(name, Vec::new())
    }

    pub fn from_hits(name: impl Into<String>, hits: Vec<KnowledgeHit>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(RwLock::new(hits)),
        }
    }

    /// Load a JSON array of hits.
    pub async fn from_json_file(
        name: impl Into<String>,
        path: &Path,
    ) -> Result<Self, KnowledgeError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| KnowledgeError::Storage(format!("{}: {e}", path.display())))?;
        let hits: Vec<KnowledgeHit> = serde_json::from_str(&raw)
            .map_err(|e| KnowledgeError::Storage(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), count = hits.len(), "Loaded knowledge entries");
        Ok(Self::from_hits(name, hits))
    }

    pub async fn insert(&self, hit: KnowledgeHit) {
        self.entries.write().await.push(hit);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn score(hit: &KnowledgeHit, keywords: &[String]) -> usize {
    let mut haystack = hit.content.to_lowercase();
    if let Some(title) = &hit.title {
        haystack.push(' ');
        haystack.push_str(&title.to_lowercase());
    }
    for tag in &hit.tags {
        haystack.push(' ');
        haystack.push_str(&tag.to_lowercase());
    }
    keywords
        .iter()
        .filter(|k| haystack.contains(k.as_str()))
        .count()
}

#[async_trait]
impl KnowledgeSource for InMemoryKnowledge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeHit>, KnowledgeError> {
        let keywords = significant_keywords(query);
        if keywords.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let mut scored: Vec<(usize, &KnowledgeHit)> = entries
            .iter()
            .map(|hit| (score(hit, &keywords), hit))
            .filter(|(s, _)| *s > 0)
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, hit)| hit.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> InMemoryKnowledge {
        InMemoryKnowledge::from_hits(
            "notes",
            vec![
                KnowledgeHit::new("file:rust.md", "Rust editions ship every three years"),
                KnowledgeHit::new("file:weather.md", "Weather in Oslo is usually rainy in autumn")
                    .with_category("file"),
                KnowledgeHit::new("web:forecast", "Forecast: sunny weather tomorrow in Oslo")
                    .with_category("web"),
            ],
        )
    }

    #[tokio::test]
    async fn ranks_by_keyword_overlap() {
        let kb = sample();
        let hits = kb.search("What is the weather forecast for Oslo?", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].reference, "web:forecast");
        assert_eq!(hits[1].reference, "file:weather.md");
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let kb = sample();
        let hits = kb.search("weather", 5).await.unwrap();
        assert_eq!(hits[0].reference, "file:weather.md");
        assert_eq!(hits[1].reference, "web:forecast");
    }

    #[tokio::test]
    async fn limit_and_empty_queries() {
        let kb = sample();
        assert_eq!(kb.search("weather", 1).await.unwrap().len(), 1);
        assert!(kb.search("is it on?", 5).await.unwrap().is_empty());
        assert!(kb.search("quantum", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tags_count_towards_score() {
        let kb = InMemoryKnowledge::new("prefs");
        let mut hit = KnowledgeHit::new("pref:units", "Use metric units");
        hit.tags.push("temperature".into());
        kb.insert(hit).await;
        assert_eq!(kb.len().await, 1);

        let hits = kb.search("Which temperature scale?", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn loads_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"reference":"file:a.md","content":"Cargo workspaces share a lockfile","category":"file"}}]"#
        )
        .unwrap();

        let kb = InMemoryKnowledge::from_json_file("docs", file.path()).await.unwrap();
        let hits = kb.search("How do cargo workspaces work?", 5).await.unwrap();
        assert_eq!(hits[0].reference, "file:a.md");
    }

    #[tokio::test]
    async fn bad_json_is_storage_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = InMemoryKnowledge::from_json_file("docs", file.path())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, KnowledgeError::Storage(_)));
    }
}
