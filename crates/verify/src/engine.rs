//! Verification engine.
//!
//! The engine runs every rule against a draft and returns a
//! [`VerificationResult`] that the request loop must obey: a draft is
//! released only when no error-severity rule failed.

use cairn_core::evidence::EvidenceItem;
use tracing::{debug, warn};

use crate::model::{Severity, VerificationIssue, VerificationResult};
use crate::rules::{Rule, RuleContext, canonical_rules};

/// Default cap on the minimum-length threshold.
pub const DEFAULT_MIN_LENGTH_CAP: usize = 50;

/// Holds an ordered rule set. Stateless between calls.
pub struct VerificationEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl VerificationEngine {
    /// The canonical rule set.
    pub fn standard(min_length_cap: usize) -> Self {
        Self {
            rules: canonical_rules(min_length_cap),
        }
    }

    /// An engine with no rules (everything passes).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule after the existing ones.
    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Score a draft. Issues are reported in rule order.
    pub fn verify(
        &self,
        text: &str,
        user_message: &str,
        evidence: &[EvidenceItem],
    ) -> VerificationResult {
        let ctx = RuleContext {
            user_message,
            evidence,
        };

        let issues: Vec<VerificationIssue> = self
            .rules
            .iter()
            .filter_map(|rule| {
                rule.check(text, &ctx).map(|feedback| VerificationIssue {
                    rule_name: rule.name().to_string(),
                    severity: rule.severity(),
                    feedback,
                })
            })
            .collect();

        for issue in &issues {
            match issue.severity {
                Severity::Error => warn!(rule = %issue.rule_name, "Verification error: {}", issue.feedback),
                Severity::Warning => debug!(rule = %issue.rule_name, "Verification warning: {}", issue.feedback),
            }
        }

        VerificationResult::from_issues(issues)
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::standard(DEFAULT_MIN_LENGTH_CAP)
    }
}
