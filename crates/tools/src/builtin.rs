//! Built-in tools shipped with the CLI.

use async_trait::async_trait;
use cairn_core::error::ToolError;
use cairn_core::tool::Tool;
use chrono::{FixedOffset, Utc};
use serde_json::Value;

use crate::local::LocalToolProvider;

/// Name of the provider that serves the built-in tools.
pub const BUILTIN_PROVIDER: &str = "builtin";

/// Current date and time, optionally shifted to a UTC offset.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Optionally pass a UTC offset in hours."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "integer",
                    "description": "Offset from UTC in hours, e.g. 2 or -5 (default: 0)"
                }
            }
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let hours = match arguments.get("utc_offset_hours") {
            None | Some(Value::Null) => 0,
            Some(v) => v.as_i64().ok_or_else(|| {
                ToolError::InvalidArguments("'utc_offset_hours' must be an integer".into())
            })?,
        };
        let offset = i32::try_from(hours)
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ToolError::InvalidArguments(format!("UTC offset out of range: {hours}"))
            })?;

        let now = Utc::now().with_timezone(&offset);
        Ok(serde_json::json!({
            "iso8601": now.to_rfc3339(),
            "weekday": now.format("%A").to_string(),
        }))
    }
}

/// The provider holding every built-in tool.
pub fn builtin_provider() -> LocalToolProvider {
    LocalToolProvider::new(BUILTIN_PROVIDER).with_tool(CurrentTimeTool)
}
