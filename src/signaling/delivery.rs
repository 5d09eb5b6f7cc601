//! Outbound delivery to a specific connection
//!
//! Every connection drains its own bounded queue from a single task,
//! so frames to one viewer are never interleaved. Enqueueing never
//! waits: a slow viewer cannot stall the pipeline reader or another
//! session.

use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::protocol::IceCandidate;
use super::registry::SessionRegistry;
use super::session::{CloseReason, SessionId};

/// Item queued for a connection's writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Session description produced by the pipeline
    Offer { sdp: String },
    /// Pipeline-side connectivity candidate
    IceCandidate(IceCandidate),
    /// Pipeline could not produce an offer
    OfferFailed { reason: String },
    /// Server-initiated close
    Close(CloseReason),
}

impl Outbound {
    fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::IceCandidate(_) => "ice-candidate",
            Self::OfferFailed { .. } => "offer-failed",
            Self::Close(_) => "close",
        }
    }
}

/// Routes outbound items to live sessions by id
#[derive(Clone)]
pub struct DeliveryChannel {
    registry: Arc<SessionRegistry>,
}

impl DeliveryChannel {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Queue `message` for the session's connection
    ///
    /// Returns `false` without error when the session is gone or its
    /// queue is full or closed.
    pub fn send(&self, id: &SessionId, message: Outbound) -> bool {
        let Some(outbound) = self.registry.outbound(id) else {
            debug!("Dropping {} for closed session {}", message.kind(), id);
            return false;
        };

        match outbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(
                    "Outbound queue full for session {}, dropping {}",
                    id,
                    message.kind()
                );
                false
            }
            Err(TrySendError::Closed(message)) => {
                debug!("Connection for session {} already gone, dropping {}", id, message.kind());
                false
            }
        }
    }
}
