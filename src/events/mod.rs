//! Event system for real-time relay notifications
//!
//! Session lifecycle and pipeline status changes are broadcast to
//! monitoring WebSocket clients through the event bus.

pub mod types;

pub use types::RelayEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting relay events
///
/// Uses tokio's broadcast channel; every active subscriber receives
/// every event. A subscriber that falls too far behind sees `Lagged`.
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: RelayEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
