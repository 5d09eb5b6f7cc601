use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::ConfigStore;
use crate::events::{EventBus, RelayEvent};
use crate::signaling::SignalingRelay;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Signaling relay (session registry and pipeline gateway)
    pub relay: Arc<SignalingRelay>,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        relay: Arc<SignalingRelay>,
        events: Arc<EventBus>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            relay,
            events,
            shutdown_tx,
        })
    }

    /// Subscribe to shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Current pipeline status, sent to event clients when they subscribe
    pub fn pipeline_status(&self) -> RelayEvent {
        let connected = self.relay.gateway().is_available();
        RelayEvent::PipelineStatus {
            connected,
            error: None,
        }
    }
}
