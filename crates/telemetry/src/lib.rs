//! Execution tracing for cairn requests.
//!
//! One trace per request; spans for the turn, each phase, every provider
//! call, tool execution, verification pass and compaction. Recording never
//! fails and never blocks the request on anything but a short lock.

pub mod engine;
pub mod model;

pub use engine::TelemetryEngine;
pub use model::{Span, SpanKind, Trace, UsageSnapshot};
