//! Message router
//!
//! One router per connection. Applies inbound viewer messages and
//! queued pipeline results to the session's [`Negotiation`], calls the
//! gateway, and tells the connection what (if anything) to write back.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::delivery::Outbound;
use super::negotiation::{InvalidSequence, Negotiation, OfferAction};
use super::protocol::{ClientMessage, ErrorReason, ServerMessage};
use super::relay::SignalingRelay;
use super::session::{NegotiationState, SessionId};
use crate::events::RelayEvent;

pub struct MessageRouter {
    session_id: SessionId,
    source_id: String,
    negotiation: Negotiation,
    relay: Arc<SignalingRelay>,
}

impl MessageRouter {
    pub fn new(relay: Arc<SignalingRelay>, session_id: SessionId, source_id: impl Into<String>) -> Self {
        Self {
            session_id,
            source_id: source_id.into(),
            negotiation: Negotiation::with_offer_timeout(relay.offer_timeout()),
            relay,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> NegotiationState {
        self.negotiation.state()
    }

    /// Handle a decoded viewer message; returns a reply for the viewer, if any
    pub async fn handle_client_message(&mut self, message: ClientMessage) -> Option<ServerMessage> {
        debug!("Session {} <- {}", self.session_id, message.kind());

        let before = self.snapshot();
        let reply = match message {
            ClientMessage::GetOffer => self.on_get_offer().await,
            ClientMessage::Answer { sdp } => match self.negotiation.on_answer() {
                Ok(()) => {
                    if let Err(e) = self.relay.gateway().submit_answer(&self.session_id, &sdp).await {
                        warn!("Failed to forward answer for {}: {}", self.session_id, e);
                    }
                    None
                }
                Err(e) => self.reject(e),
            },
            ClientMessage::IceCandidate { candidate } => match self.negotiation.on_remote_candidate() {
                Ok(()) => {
                    if candidate.line().map_or(true, str::is_empty) {
                        debug!("End-of-candidates from {}", self.session_id);
                    }
                    if let Err(e) = self
                        .relay
                        .gateway()
                        .submit_ice_candidate(&self.session_id, &candidate)
                        .await
                    {
                        warn!("Failed to forward candidate for {}: {}", self.session_id, e);
                    }
                    None
                }
                Err(e) => self.reject(e),
            },
            ClientMessage::Unknown => {
                debug!("Ignoring unknown message type on {}", self.session_id);
                None
            }
        };
        self.publish_if_changed(before);
        reply
    }

    async fn on_get_offer(&mut self) -> Option<ServerMessage> {
        match self.negotiation.on_get_offer() {
            Ok(OfferAction::Request) => {
                // Gateways only queue the request, so awaiting keeps this
                // session's calls in arrival order without stalling reads
                if let Err(e) = self
                    .relay
                    .gateway()
                    .request_offer(&self.source_id, &self.session_id)
                    .await
                {
                    warn!("Offer request for {} failed: {}", self.session_id, e);
                    self.relay.delivery().send(
                        &self.session_id,
                        Outbound::OfferFailed {
                            reason: e.to_string(),
                        },
                    );
                }
                None
            }
            Ok(OfferAction::AlreadyPending) => {
                debug!("Offer already pending for {}, not re-requesting", self.session_id);
                None
            }
            Err(e) => self.reject(e),
        }
    }

    fn reject(&self, error: InvalidSequence) -> Option<ServerMessage> {
        warn!("Session {}: {}", self.session_id, error);
        Some(ServerMessage::error(ErrorReason::InvalidSequence))
    }

    /// Handle a queued pipeline result; returns the frame to write, if any
    ///
    /// `Outbound::Close` is the connection's concern and yields nothing here.
    pub fn handle_outbound(&mut self, outbound: Outbound) -> Option<ServerMessage> {
        let before = self.snapshot();
        let message = match outbound {
            Outbound::Offer { sdp } => {
                if self.negotiation.on_offer_ready() {
                    info!("Delivering offer to {}", self.session_id);
                    Some(ServerMessage::Offer { sdp })
                } else {
                    debug!(
                        "Dropping late offer for {} in state {}",
                        self.session_id,
                        self.negotiation.state()
                    );
                    None
                }
            }
            Outbound::IceCandidate(candidate) => {
                if self.negotiation.on_local_candidate() {
                    Some(ServerMessage::IceCandidate { candidate })
                } else {
                    debug!(
                        "Dropping pipeline candidate for {} in state {}",
                        self.session_id,
                        self.negotiation.state()
                    );
                    None
                }
            }
            Outbound::OfferFailed { reason } => {
                if self.negotiation.on_offer_failed() {
                    warn!("Pipeline could not produce offer for {}: {}", self.session_id, reason);
                }
                None
            }
            Outbound::Close(_) => None,
        };
        self.publish_if_changed(before);
        message
    }

    /// Enter the terminal state
    pub fn close(&mut self) {
        if self.negotiation.close() {
            debug!("Session {} negotiation closed", self.session_id);
        }
    }

    fn snapshot(&self) -> (NegotiationState, bool) {
        (self.negotiation.state(), self.negotiation.ice_exchange())
    }

    fn publish_if_changed(&self, before: (NegotiationState, bool)) {
        let after = self.snapshot();
        if before == after {
            return;
        }
        let (state, ice_exchange) = after;
        self.relay
            .registry()
            .update_state(&self.session_id, state, ice_exchange);
        self.relay.events().publish(RelayEvent::SessionStateChanged {
            session_id: self.session_id.to_string(),
            state,
            ice_exchange,
        });
    }
}
