//! Rule-based scoring of a draft before it is released.
//!
//! Every draft the completion provider produces goes through the
//! [`VerificationEngine`] before a caller sees it. Rules come in two
//! severities: errors block release and drive a retry, warnings only
//! contribute feedback.
//!
//! ```text
//! draft ──▶ VerificationEngine ──▶ VerificationResult
//!              │                     passed: bool
//!              ├─ not-empty          issues: [{rule, severity, feedback}]
//!              ├─ no-illegal-bold-markup
//!              └─ ...
//! ```

mod engine;
mod model;
pub mod rules;

pub use engine::{DEFAULT_MIN_LENGTH_CAP, VerificationEngine};
pub use model::{Severity, VerificationIssue, VerificationResult};
pub use rules::{Rule, RuleContext, SOURCES_HEADING};
