//! Gateway used when no pipeline is configured

use async_trait::async_trait;
use tracing::{debug, warn};

use super::gateway::{PipelineGateway, PipelineSink};
use crate::error::Result;
use crate::signaling::{IceCandidate, SessionId};

/// Refuses every offer request
///
/// Lets the relay run (and be monitored) without a pipeline; viewers
/// simply never receive an offer.
pub struct UnavailableGateway {
    sink: PipelineSink,
}

impl UnavailableGateway {
    pub fn new(sink: PipelineSink) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl PipelineGateway for UnavailableGateway {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn request_offer(&self, source_id: &str, session_id: &SessionId) -> Result<()> {
        warn!(
            "No media pipeline configured, cannot produce offer for {} ({})",
            source_id, session_id
        );
        self.sink.offer_failed(session_id, "pipeline-unavailable");
        Ok(())
    }

    async fn submit_answer(&self, session_id: &SessionId, _sdp: &str) -> Result<()> {
        debug!("Discarding answer for {}: no pipeline", session_id);
        Ok(())
    }

    async fn submit_ice_candidate(
        &self,
        session_id: &SessionId,
        _candidate: &IceCandidate,
    ) -> Result<()> {
        debug!("Discarding candidate for {}: no pipeline", session_id);
        Ok(())
    }

    async fn notify_session_closed(&self, _session_id: &SessionId) {}
}
