//! Relay event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::signaling::{CloseReason, NegotiationState, SessionInfo};

/// Relay event broadcast to monitoring clients
///
/// Serialized as:
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "session_id": "cam-1-...", "state": "offer_sent", "ice_exchange": false }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RelayEvent {
    /// A viewer connected and a session was registered
    #[serde(rename = "session.opened")]
    SessionOpened {
        session_id: String,
        source_id: String,
    },

    /// Negotiation state changed
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        session_id: String,
        state: NegotiationState,
        /// Whether candidates have been exchanged
        ice_exchange: bool,
    },

    /// Session torn down
    #[serde(rename = "session.closed")]
    SessionClosed {
        session_id: String,
        source_id: String,
        reason: CloseReason,
    },

    /// Pipeline connection came up or went down
    #[serde(rename = "pipeline.status")]
    PipelineStatus {
        connected: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Every live session, sent to a monitor on subscribe and after it lagged
    ///
    /// Never published on the bus.
    #[serde(rename = "sessions.snapshot")]
    SessionsSnapshot {
        capacity: usize,
        sessions: Vec<SessionInfo>,
    },
}

impl RelayEvent {
    /// Get the event name (for filtering)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionOpened { .. } => "session.opened",
            Self::SessionStateChanged { .. } => "session.state_changed",
            Self::SessionClosed { .. } => "session.closed",
            Self::PipelineStatus { .. } => "pipeline.status",
            Self::SessionsSnapshot { .. } => "sessions.snapshot",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports `*` (everything), `prefix.*` and exact names.
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if let Some(prefix) = topic.strip_suffix(".*") {
            event_name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        } else {
            event_name == topic
        }
    }
}
