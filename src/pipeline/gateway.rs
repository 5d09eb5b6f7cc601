//! Pipeline gateway trait definition

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::signaling::{DeliveryChannel, IceCandidate, Outbound, SessionId};

/// Boundary to the external media pipeline
///
/// Every method must return promptly: implementations queue work rather
/// than wait on the pipeline. Results travel back through the
/// [`PipelineSink`] the gateway was built with.
#[async_trait]
pub trait PipelineGateway: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Whether the pipeline is currently reachable
    fn is_available(&self) -> bool {
        true
    }

    /// Ask for a session description for `source_id`
    ///
    /// Fire-and-forget: the offer (or refusal) arrives later through the
    /// sink, keyed by `session_id`.
    async fn request_offer(&self, source_id: &str, session_id: &SessionId) -> Result<()>;

    /// Forward the viewer's answer
    async fn submit_answer(&self, session_id: &SessionId, sdp: &str) -> Result<()>;

    /// Forward a viewer candidate
    async fn submit_ice_candidate(
        &self,
        session_id: &SessionId,
        candidate: &IceCandidate,
    ) -> Result<()>;

    /// Release pipeline resources for a finished session
    async fn notify_session_closed(&self, session_id: &SessionId);
}

/// Where the pipeline's asynchronous results go
///
/// Thin wrapper over the delivery channel; results for sessions that
/// have closed are dropped.
#[derive(Clone)]
pub struct PipelineSink {
    delivery: DeliveryChannel,
}

impl PipelineSink {
    pub fn new(delivery: DeliveryChannel) -> Self {
        Self { delivery }
    }

    pub fn offer(&self, session_id: &SessionId, sdp: impl Into<String>) -> bool {
        self.delivery
            .send(session_id, Outbound::Offer { sdp: sdp.into() })
    }

    pub fn ice_candidate(&self, session_id: &SessionId, candidate: IceCandidate) -> bool {
        self.delivery
            .send(session_id, Outbound::IceCandidate(candidate))
    }

    pub fn offer_failed(&self, session_id: &SessionId, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        debug!("Pipeline refused offer for {}: {}", session_id, reason);
        self.delivery
            .send(session_id, Outbound::OfferFailed { reason })
    }
}
