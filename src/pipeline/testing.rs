//! Recording gateway for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::gateway::{PipelineGateway, PipelineSink};
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::signaling::negotiation::DEFAULT_OFFER_TIMEOUT;
use crate::signaling::{DeliveryChannel, IceCandidate, SessionId, SessionRegistry, SignalingRelay};

/// A call the relay made into the gateway
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    RequestOffer {
        source_id: String,
        session_id: SessionId,
    },
    Answer {
        session_id: SessionId,
        sdp: String,
    },
    IceCandidate {
        session_id: SessionId,
        candidate: IceCandidate,
    },
    SessionClosed {
        session_id: SessionId,
    },
}

/// How the double answers offer requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferMode {
    /// Record only; the test delivers offers through `sink()`
    Manual,
    /// Reply immediately with `offer-for-{source_id}`
    Auto,
    /// Report every request as failed through the sink
    Refuse,
    /// Return an error from `request_offer` itself
    Error,
}

pub struct RecordingGateway {
    sink: PipelineSink,
    mode: OfferMode,
    calls: Mutex<Vec<GatewayCall>>,
}

impl RecordingGateway {
    pub fn new(sink: PipelineSink, mode: OfferMode) -> Self {
        Self {
            sink,
            mode,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn sink(&self) -> &PipelineSink {
        &self.sink
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, id: &SessionId) -> Vec<GatewayCall> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                GatewayCall::RequestOffer { session_id, .. }
                | GatewayCall::Answer { session_id, .. }
                | GatewayCall::IceCandidate { session_id, .. }
                | GatewayCall::SessionClosed { session_id } => session_id == id,
            })
            .collect()
    }

    pub fn offer_requests(&self, id: &SessionId) -> usize {
        self.calls_for(id)
            .iter()
            .filter(|c| matches!(c, GatewayCall::RequestOffer { .. }))
            .count()
    }

    pub fn closed_count(&self, id: &SessionId) -> usize {
        self.calls_for(id)
            .iter()
            .filter(|c| matches!(c, GatewayCall::SessionClosed { .. }))
            .count()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PipelineGateway for RecordingGateway {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn request_offer(&self, source_id: &str, session_id: &SessionId) -> Result<()> {
        self.record(GatewayCall::RequestOffer {
            source_id: source_id.to_string(),
            session_id: session_id.clone(),
        });
        match self.mode {
            OfferMode::Manual => {}
            OfferMode::Auto => {
                self.sink.offer(session_id, format!("offer-for-{}", source_id));
            }
            OfferMode::Refuse => {
                self.sink.offer_failed(session_id, "unknown-source");
            }
            OfferMode::Error => {
                return Err(AppError::Gateway("pipeline queue full".to_string()));
            }
        }
        Ok(())
    }

    async fn submit_answer(&self, session_id: &SessionId, sdp: &str) -> Result<()> {
        self.record(GatewayCall::Answer {
            session_id: session_id.clone(),
            sdp: sdp.to_string(),
        });
        Ok(())
    }

    async fn submit_ice_candidate(
        &self,
        session_id: &SessionId,
        candidate: &IceCandidate,
    ) -> Result<()> {
        self.record(GatewayCall::IceCandidate {
            session_id: session_id.clone(),
            candidate: candidate.clone(),
        });
        Ok(())
    }

    async fn notify_session_closed(&self, session_id: &SessionId) {
        self.record(GatewayCall::SessionClosed {
            session_id: session_id.clone(),
        });
    }
}

/// Relay wired to a recording gateway
pub fn test_relay(capacity: usize, mode: OfferMode) -> (Arc<SignalingRelay>, Arc<RecordingGateway>) {
    test_relay_with_offer_timeout(capacity, mode, DEFAULT_OFFER_TIMEOUT)
}

pub fn test_relay_with_offer_timeout(
    capacity: usize,
    mode: OfferMode,
    offer_timeout: Duration,
) -> (Arc<SignalingRelay>, Arc<RecordingGateway>) {
    let registry = Arc::new(SessionRegistry::new(capacity));
    let sink = PipelineSink::new(DeliveryChannel::new(registry.clone()));
    let gateway = Arc::new(RecordingGateway::new(sink, mode));
    let relay = SignalingRelay::new(
        registry,
        gateway.clone(),
        Arc::new(EventBus::new()),
        16,
        offer_timeout,
    );
    (relay, gateway)
}
