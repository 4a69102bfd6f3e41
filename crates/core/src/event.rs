//! Domain events, the write-only observability hook.
//!
//! The loop and gateway publish events at phase boundaries, per tool call
//! and per verification attempt. Nothing in the request path reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The loop entered a new phase ("gather", "act", "tool", "verify", "final")
    PhaseChanged {
        conversation_id: String,
        phase: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed through the gateway
    ToolExecuted {
        tool_name: String,
        provider: String,
        input_summary: String,
        output_summary: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A draft was scored
    VerificationCompleted {
        conversation_id: String,
        attempt: u32,
        passed: bool,
        issue_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Older history was replaced by a summary
    CompactionApplied {
        conversation_id: String,
        original_tokens: usize,
        compacted_tokens: usize,
        timestamp: DateTime<Utc>,
    },

    /// The loop produced its final reply
    ResponseGenerated {
        conversation_id: String,
        model: String,
        verified: bool,
        attempt_count: u32,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            tool_name: "forecast".into(),
            provider: "weather".into(),
            input_summary: r#"{"city":"Oslo"}"#.into(),
            output_summary: "sunny".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted {
                tool_name, success, ..
            } => {
                assert_eq!(tool_name, "forecast");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ErrorOccurred {
            context: "test".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
