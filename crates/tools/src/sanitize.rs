//! Argument sanitization for logs and events.
//!
//! Produces a copy of tool arguments that is safe to log. The value actually
//! sent to the tool provider is never touched.

use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Strings longer than this are cut.
pub const MAX_STRING_CHARS: usize = 200;

/// Arrays longer than this are cut.
pub const MAX_ARRAY_ITEMS: usize = 10;

const SECRET_KEY_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "token",
    "secret",
    "key",
    "auth",
    "credential",
];

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_KEY_FRAGMENTS.iter().any(|f| key.contains(f))
}

/// A log-safe copy of `value`.
pub fn sanitize_args(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_secret_key(k) {
                        Value::String(REDACTED.into())
                    } else {
                        sanitize_args(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .take(MAX_ARRAY_ITEMS)
                .map(sanitize_args)
                .collect();
            if items.len() > MAX_ARRAY_ITEMS {
                out.push(Value::String(format!(
                    "... ({} more items)",
                    items.len() - MAX_ARRAY_ITEMS
                )));
            }
            Value::Array(out)
        }
        Value::String(s) => Value::String(truncate(s, MAX_STRING_CHARS)),
        other => other.clone(),
    }
}

/// Cut `s` to `max` characters, marking the cut.
pub fn truncate(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max).collect();
    format!("{kept}... ({} chars truncated)", count - max)
}

/// One-line summary of a JSON value for events.
pub fn summarize(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate(&rendered, MAX_STRING_CHARS)
}
