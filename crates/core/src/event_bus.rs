//! Broadcast event bus — tagged lifecycle events and the sinks that receive them.
//!
//! A dispatcher observer can forward every callback into an `Arc<dyn EventSink>`,
//! which routes events to logs, test captures, or an external pipeline.

use serde::Serialize;
use std::sync::{Arc, Mutex};

/// One lifecycle notification from a broadcast run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BroadcastEvent {
    BatchStart { addresses: Vec<String> },
    BatchComplete { addresses: Vec<String> },
    BroadcastComplete,
    BroadcastAborted { reason: String },
    AddressUnreachable { address: String },
    MessageSending { address: String },
    MessageSent { address: String },
    MessageFailed { address: String },
    CapabilityUpdated { addresses: Vec<String> },
    Delay { ms: u64 },
}

impl BroadcastEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BroadcastEvent::BatchStart { .. } => "batch_start",
            BroadcastEvent::BatchComplete { .. } => "batch_complete",
            BroadcastEvent::BroadcastComplete => "broadcast_complete",
            BroadcastEvent::BroadcastAborted { .. } => "broadcast_aborted",
            BroadcastEvent::AddressUnreachable { .. } => "address_unreachable",
            BroadcastEvent::MessageSending { .. } => "message_sending",
            BroadcastEvent::MessageSent { .. } => "message_sent",
            BroadcastEvent::MessageFailed { .. } => "message_failed",
            BroadcastEvent::CapabilityUpdated { .. } => "capability_updated",
            BroadcastEvent::Delay { .. } => "delay",
        }
    }
}

/// Trait for receiving broadcast events. Implementations must not block:
/// events are delivered synchronously from the dispatch loop.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BroadcastEvent);
}

/// Writes every event to the `tracing` pipeline, serialized as tagged JSON.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: BroadcastEvent) {
        match &event {
            BroadcastEvent::MessageFailed { address } => {
                tracing::warn!(address = %address, "Broadcast message failed");
            }
            BroadcastEvent::BroadcastAborted { reason } => {
                tracing::error!(reason = %reason, "Broadcast aborted");
            }
            other => match serde_json::to_string(other) {
                Ok(json) => {
                    tracing::info!(event = other.name(), detail = %json, "Broadcast event")
                }
                Err(e) => {
                    tracing::warn!(event = other.name(), error = %e, "Event not serializable")
                }
            },
        }
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<BroadcastEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<BroadcastEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .map(BroadcastEvent::name)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: BroadcastEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
