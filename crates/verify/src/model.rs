//! Verification data model.

use serde::{Deserialize, Serialize};

/// How much a failed rule matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks release.
    Error,
    /// Reported as feedback only.
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// One failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationIssue {
    pub rule_name: String,
    pub severity: Severity,
    pub feedback: String,
}

/// The outcome of scoring one draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// False iff at least one error-severity issue is present.
    pub passed: bool,
    pub issues: Vec<VerificationIssue>,
}

impl VerificationResult {
    pub fn from_issues(issues: Vec<VerificationIssue>) -> Self {
        let passed = !issues.iter().any(|i| i.severity == Severity::Error);
        Self { passed, issues }
    }

    pub fn errors(&self) -> impl Iterator<Item = &VerificationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &VerificationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    /// All issue feedback as one block, one `- [rule] feedback` line each.
    pub fn feedback(&self) -> String {
        self.issues
            .iter()
            .map(|i| format!("- [{}] {}", i.rule_name, i.feedback))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
