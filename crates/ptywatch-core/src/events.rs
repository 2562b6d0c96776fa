//! Transition events and the sinks that consume them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::agents::SessionState;

/// Emitted whenever a session changes state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub session_id: String,
    pub agent_type: String,
    pub old_state: SessionState,
    pub new_state: SessionState,
    pub summary: String,
    #[serde(default)]
    pub actions: Vec<String>,
    pub ts: DateTime<Utc>,
}

/// Consumer of transition events
///
/// Fire-and-forget: implementations swallow (and log) their own failures so
/// that nothing flows back into the state machine.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &TransitionEvent);
}

/// Fans events out to every registered sink
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn notify(&self, event: &TransitionEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}

/// Channel capacity for the in-process event bus
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// In-process broadcast of transition events
///
/// Receivers that fall behind lose the oldest events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TransitionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for EventBus {
    fn notify(&self, event: &TransitionEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event.clone());
    }
}
