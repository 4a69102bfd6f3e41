//! Tool Execution Gateway.
//!
//! Executes exactly one tool call: logs a sanitized copy of the arguments,
//! bounds the call with a timeout, reports the outcome to the
//! [`HealthTracker`] and publishes a `ToolExecuted` event. Errors are
//! returned as data so the loop can hand them back to the model.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cairn_core::error::ToolError;
use cairn_core::event::{DomainEvent, EventBus};
use cairn_core::tool::{ToolKey, ToolProvider};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::health::HealthTracker;
use crate::sanitize::{sanitize_args, summarize};

/// The outcome of one gateway call.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub key: ToolKey,
    pub outcome: Result<Value, ToolError>,
    pub duration_ms: u64,
}

impl ToolExecution {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Text handed back to the model as the tool result.
    pub fn result_text(&self) -> String {
        match &self.outcome {
            Ok(Value::String(s)) => s.clone(),
            Ok(value) => value.to_string(),
            Err(e) => format!(
                "Error [{}] (retryable: {}): {}",
                e.code(),
                e.is_retryable(),
                e
            ),
        }
    }
}

pub struct ToolGateway {
    tracker: Arc<HealthTracker>,
    timeout: Duration,
    events: Option<Arc<EventBus>>,
}

impl ToolGateway {
    pub fn new(tracker: Arc<HealthTracker>, timeout: Duration) -> Self {
        Self {
            tracker,
            timeout,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn tracker(&self) -> &Arc<HealthTracker> {
        &self.tracker
    }

    /// Run one tool on one provider.
    ///
    /// Any failure on the provider's side (timeout, unreachable, internal
    /// error) counts against its health and a success resets it. Caller
    /// faults such as bad arguments leave the health untouched.
    pub async fn execute(
        &self,
        provider: &dyn ToolProvider,
        tool_name: &str,
        args: Value,
    ) -> ToolExecution {
        let key = ToolKey::new(provider.name(), tool_name);
        let logged_args = sanitize_args(&args);
        debug!(tool = %key, args = %logged_args, "Executing tool");

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, provider.call_tool(tool_name, args))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: key.qualified(),
                timeout_secs: self.timeout.as_secs(),
            }),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => {
                self.tracker.mark_success(&key.provider);
                debug!(tool = %key, duration_ms, "Tool succeeded");
            }
            Err(e) if e.is_caller_fault() => {
                warn!(tool = %key, duration_ms, code = e.code(), "Tool rejected call: {e}");
            }
            Err(e) => {
                let health = self.tracker.mark_failure(&key.provider);
                warn!(
                    tool = %key,
                    duration_ms,
                    code = e.code(),
                    consecutive_failures = health.consecutive_failures,
                    "Tool failed: {e}"
                );
            }
        }

        if let Some(events) = &self.events {
            let output_summary = match &outcome {
                Ok(v) => summarize(v),
                Err(e) => e.to_string(),
            };
            events.publish(DomainEvent::ToolExecuted {
                tool_name: key.name.clone(),
                provider: key.provider.clone(),
                input_summary: summarize(&logged_args),
                output_summary,
                success: outcome.is_ok(),
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        ToolExecution {
            key,
            outcome,
            duration_ms,
        }
    }
}
