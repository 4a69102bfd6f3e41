//! `cairn check` — run the verification rules over a draft.

use cairn_config::AppConfig;
use cairn_core::evidence::{EvidenceItem, EvidenceKind};
use cairn_verify::{Severity, VerificationEngine, VerificationResult};

/// Prints the issues and returns whether the draft would be released.
pub fn run(text: &str, question: &str, evidence: &[String]) -> anyhow::Result<bool> {
    let config = AppConfig::load()?;
    let engine = VerificationEngine::standard(config.verification.min_length_cap);
    let result = engine.verify(text, question, &evidence_items(evidence));
    print!("{}", render(&result));
    Ok(result.passed)
}

/// `web:` / `thread:` / `tool:` prefixes pick the kind, anything else is a file.
fn evidence_items(references: &[String]) -> Vec<EvidenceItem> {
    references
        .iter()
        .map(|reference| {
            let category = reference.split_once(':').map(|(prefix, _)| prefix);
            EvidenceItem::new(EvidenceKind::from_category(category), reference.as_str())
        })
        .collect()
}

fn render(result: &VerificationResult) -> String {
    let mut out = String::new();
    if result.passed {
        out.push_str("✅ passed\n");
    } else {
        out.push_str("❌ failed\n");
    }
    for issue in &result.issues {
        let marker = match issue.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        out.push_str(&format!("   {marker:<7} [{}] {}\n", issue.rule_name, issue.feedback));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_prefix_sets_kind() {
        let items = evidence_items(&["web:forecast".into(), "notes.md".into()]);
        assert_eq!(items[0].kind, EvidenceKind::Web);
        assert_eq!(items[1].kind, EvidenceKind::File);
        assert_eq!(items[1].reference, "notes.md");
    }

    #[test]
    fn failed_draft_lists_errors() {
        let engine = VerificationEngine::default();
        let result = engine.verify("**bold**", "Make it bold", &[]);
        let out = render(&result);
        assert!(out.starts_with("❌ failed"));
        assert!(out.contains("error   [no-illegal-bold-markup]"));
    }

    #[test]
    fn clean_draft_passes() {
        let engine = VerificationEngine::default();
        let result = engine.verify("The weather in Oslo is mild today.", "What is the weather?", &[]);
        assert!(render(&result).starts_with("✅ passed"));
    }
}
