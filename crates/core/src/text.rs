//! Keyword extraction shared by verification rules and keyword lookups.

/// Words too common to say anything about what a question is about.
pub const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "been", "before", "being", "below",
    "between", "both", "could", "does", "doing", "down", "during", "each", "from", "further",
    "have", "having", "here", "into", "just", "more", "most", "much", "only", "other", "over",
    "same", "should", "some", "such", "than", "that", "their", "theirs", "them", "then",
    "there", "these", "they", "this", "those", "through", "under", "until", "very", "were",
    "what", "when", "where", "which", "while", "whom", "whose", "will", "with", "would",
    "your", "yours", "please", "tell", "know", "like", "want", "need", "make", "give",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Lowercased alphanumeric words longer than 3 characters, stopwords
/// removed, deduplicated in first-seen order.
pub fn significant_keywords(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
    {
        let word = word.to_lowercase();
        if is_stopword(&word) || out.contains(&word) {
            continue;
        }
        out.push(word);
    }
    out
}
