//! Domain event system: progress notifications out of the agent loop.
//!
//! The loop publishes events as it reasons and acts. The CLI subscribes to
//! render intermediate steps; nothing in the core depends on a subscriber
//! being present.

use crate::tool::{ToolCall, ToolStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A user instruction entered the loop
    TurnStarted {
        session_id: String,
        instruction_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A streamed content delta from the model
    Token { text: String },

    /// The model answered one inference
    ModelResponded {
        session_id: String,
        iteration: u32,
        tool_calls: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was recorded and is about to be gated
    ToolCallRequested {
        call: ToolCall,
        timestamp: DateTime<Utc>,
    },

    /// A tool call produced its result
    ToolExecuted {
        call_id: String,
        tool_name: String,
        status: ToolStatus,
        truncated: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The user turn ended (answer, error, or cancellation)
    TurnFinished {
        session_id: String,
        iterations: u32,
        outcome: String,
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
            call_id: "c1".into(),
            tool_name: "ls".into(),
            status: ToolStatus::Exited { code: 0 },
            truncated: false,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, status, .. } => {
                assert_eq!(tool_name, "ls");
                assert_eq!(*status, ToolStatus::Exited { code: 0 });
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
