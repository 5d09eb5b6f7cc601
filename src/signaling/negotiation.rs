//! Negotiation state machine
//!
//! Pure transition logic, no I/O. The router feeds it events and acts on
//! the returned decisions.
//!
//! ```text
//! NEW --get-offer--> OFFER_REQUESTED --offer delivered--> OFFER_SENT --answer--> ANSWERED
//!                                                             \_________ ice overlay _____/
//! any --close--> CLOSED
//! ```

use std::time::{Duration, Instant};
use thiserror::Error;

use super::session::NegotiationState;

/// Message arrived in a state that does not accept it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{message} not accepted in state {state}")]
pub struct InvalidSequence {
    pub message: &'static str,
    pub state: NegotiationState,
}

/// What to do with a `get-offer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAction {
    /// Ask the pipeline for an offer
    Request,
    /// A request is already outstanding; do nothing
    AlreadyPending,
}

/// How long an unanswered offer request blocks a fresh one
pub const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_secs(15);

/// Per-session negotiation state
#[derive(Debug, Clone)]
pub struct Negotiation {
    state: NegotiationState,
    /// When the outstanding offer request was issued
    offer_requested_at: Option<Instant>,
    offer_timeout: Duration,
    ice_exchange: bool,
}

impl Negotiation {
    pub fn new() -> Self {
        Self::with_offer_timeout(DEFAULT_OFFER_TIMEOUT)
    }

    pub fn with_offer_timeout(offer_timeout: Duration) -> Self {
        Self {
            state: NegotiationState::New,
            offer_requested_at: None,
            offer_timeout,
            ice_exchange: false,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn ice_exchange(&self) -> bool {
        self.ice_exchange
    }

    pub fn offer_pending(&self) -> bool {
        self.offer_requested_at.is_some()
    }

    fn reject(&self, message: &'static str) -> InvalidSequence {
        InvalidSequence {
            message,
            state: self.state,
        }
    }

    /// Viewer asked for an offer
    ///
    /// Repeats while a request is outstanding are absorbed so the
    /// pipeline sees one request per outstanding offer. A request older
    /// than the offer timeout counts as lost and is issued again.
    pub fn on_get_offer(&mut self) -> Result<OfferAction, InvalidSequence> {
        match self.state {
            NegotiationState::New | NegotiationState::OfferRequested => {
                self.state = NegotiationState::OfferRequested;
                let now = Instant::now();
                match self.offer_requested_at {
                    Some(at) if now.duration_since(at) < self.offer_timeout => {
                        Ok(OfferAction::AlreadyPending)
                    }
                    _ => {
                        self.offer_requested_at = Some(now);
                        Ok(OfferAction::Request)
                    }
                }
            }
            _ => Err(self.reject("get-offer")),
        }
    }

    /// Pipeline produced an offer; returns whether to deliver it
    ///
    /// Late or duplicate offers (already sent, or session closed) are dropped.
    pub fn on_offer_ready(&mut self) -> bool {
        if self.state != NegotiationState::OfferRequested {
            return false;
        }
        self.state = NegotiationState::OfferSent;
        self.offer_requested_at = None;
        true
    }

    /// Pipeline could not produce an offer
    ///
    /// Clears the outstanding request so the next `get-offer` asks again.
    /// Returns whether a request was actually outstanding.
    pub fn on_offer_failed(&mut self) -> bool {
        if self.state == NegotiationState::OfferRequested && self.offer_requested_at.is_some() {
            self.offer_requested_at = None;
            true
        } else {
            false
        }
    }

    /// Viewer sent its answer
    pub fn on_answer(&mut self) -> Result<(), InvalidSequence> {
        match self.state {
            NegotiationState::OfferSent => {
                self.state = NegotiationState::Answered;
                Ok(())
            }
            _ => Err(self.reject("answer")),
        }
    }

    /// Viewer sent a candidate
    pub fn on_remote_candidate(&mut self) -> Result<(), InvalidSequence> {
        match self.state {
            NegotiationState::OfferSent | NegotiationState::Answered => {
                self.ice_exchange = true;
                Ok(())
            }
            _ => Err(self.reject("ice-candidate")),
        }
    }

    /// Pipeline sent a candidate; returns whether to deliver it
    ///
    /// Candidates only make sense to a viewer holding the offer.
    pub fn on_local_candidate(&mut self) -> bool {
        match self.state {
            NegotiationState::OfferSent | NegotiationState::Answered => {
                self.ice_exchange = true;
                true
            }
            _ => false,
        }
    }

    /// Enter the terminal state; returns false if already closed
    pub fn close(&mut self) -> bool {
        if self.state == NegotiationState::Closed {
            return false;
        }
        self.state = NegotiationState::Closed;
        self.offer_requested_at = None;
        true
    }
}

impl Default for Negotiation {
    fn default() -> Self {
        Self::new()
    }
}
