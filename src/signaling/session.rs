//! Session record and negotiation state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Opaque session identifier: `{source_id}-{uuid}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier for a session on `source_id`
    pub fn generate(source_id: &str) -> Self {
        Self(format!("{}-{}", source_id, uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Negotiation state
///
/// Ordered: a session only ever moves to a later variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    New,
    OfferRequested,
    OfferSent,
    Answered,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::OfferRequested => write!(f, "offer_requested"),
            Self::OfferSent => write!(f, "offer_sent"),
            Self::Answered => write!(f, "answered"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a session was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Viewer sent a close frame or the stream ended
    ClientClosed,
    /// Read or write on the connection failed
    TransportError,
    /// No activity within the idle window
    IdleTimeout,
    /// Closed through the HTTP API
    AdminClosed,
    /// Relay shutdown
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => write!(f, "client closed"),
            Self::TransportError => write!(f, "transport error"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::AdminClosed => write!(f, "closed by administrator"),
            Self::Shutdown => write!(f, "relay shutdown"),
        }
    }
}

/// One negotiation lifecycle bound to one viewer connection
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub source_id: String,
    pub state: NegotiationState,
    /// Candidates have been exchanged (overlay on OfferSent / Answered)
    pub ice_exchange: bool,
    pub created_at: Instant,
    pub opened_at: DateTime<Utc>,
    pub last_activity: Instant,
}

impl Session {
    pub fn new(id: SessionId, source_id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            source_id: source_id.into(),
            state: NegotiationState::New,
            ice_exchange: false,
            created_at: now,
            opened_at: Utc::now(),
            last_activity: now,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.to_string(),
            source_id: self.source_id.clone(),
            state: self.state,
            ice_exchange: self.ice_exchange,
            opened_at: self.opened_at,
            age_secs: self.age().as_secs(),
            idle_secs: self.idle_for().as_secs(),
        }
    }
}

/// Point-in-time view of a session for observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub source_id: String,
    pub state: NegotiationState,
    pub ice_exchange: bool,
    pub opened_at: DateTime<Utc>,
    pub age_secs: u64,
    pub idle_secs: u64,
}
