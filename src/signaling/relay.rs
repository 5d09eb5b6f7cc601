//! Relay lifecycle: session open/teardown, idle sweep, shutdown

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::delivery::{DeliveryChannel, Outbound};
use super::registry::SessionRegistry;
use super::session::{CloseReason, SessionId, SessionInfo};
use crate::config::ConfigStore;
use crate::error::Result;
use crate::events::{EventBus, RelayEvent};
use crate::pipeline::PipelineGateway;

/// Signaling relay
///
/// Owns the session registry and the gateway handle. Connection tasks
/// hold an `Arc` to it; nothing here is global.
pub struct SignalingRelay {
    registry: Arc<SessionRegistry>,
    delivery: DeliveryChannel,
    gateway: Arc<dyn PipelineGateway>,
    events: Arc<EventBus>,
    outbound_capacity: usize,
    offer_timeout: Duration,
}

impl SignalingRelay {
    pub fn new(
        registry: Arc<SessionRegistry>,
        gateway: Arc<dyn PipelineGateway>,
        events: Arc<EventBus>,
        outbound_capacity: usize,
        offer_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            delivery: DeliveryChannel::new(registry.clone()),
            registry,
            gateway,
            events,
            outbound_capacity: outbound_capacity.max(1),
            offer_timeout,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn delivery(&self) -> &DeliveryChannel {
        &self.delivery
    }

    pub fn gateway(&self) -> &Arc<dyn PipelineGateway> {
        &self.gateway
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// How long an unanswered offer request blocks a new one
    pub fn offer_timeout(&self) -> Duration {
        self.offer_timeout
    }

    /// Register a session for a newly accepted connection
    ///
    /// Returns the id and the receiving end of the connection's outbound queue.
    pub fn open_session(&self, source_id: &str) -> Result<(SessionId, mpsc::Receiver<Outbound>)> {
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        let id = self.registry.register(source_id, tx)?;

        info!("Signaling session opened: {} (source {})", id, source_id);
        self.events.publish(RelayEvent::SessionOpened {
            session_id: id.to_string(),
            source_id: source_id.to_string(),
        });
        Ok((id, rx))
    }

    /// Remove a session and release its pipeline resources
    ///
    /// Whoever removes the registry entry notifies the gateway, so a
    /// session is reported closed exactly once no matter how many paths
    /// race to tear it down. Returns whether this call did the teardown.
    pub async fn teardown(&self, id: &SessionId, reason: CloseReason) -> bool {
        let Some(session) = self.registry.unregister(id) else {
            debug!("Session {} already torn down", id);
            return false;
        };

        self.gateway.notify_session_closed(id).await;

        info!(
            "Signaling session closed: {} (source {}, {}, lived {:?})",
            id,
            session.source_id,
            reason,
            session.age()
        );
        self.events.publish(RelayEvent::SessionClosed {
            session_id: id.to_string(),
            source_id: session.source_id,
            reason,
        });
        true
    }

    /// Ask a session's connection to close itself
    pub fn request_close(&self, id: &SessionId, reason: CloseReason) -> bool {
        self.delivery.send(id, Outbound::Close(reason))
    }

    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.registry.snapshot()
    }

    /// Ask every session idle for at least `window` to close
    pub fn sweep_idle(&self, window: Duration) -> usize {
        let idle = self.registry.idle_sessions(window);
        for id in &idle {
            debug!("Session {} idle for {:?}, closing", id, window);
            self.request_close(id, CloseReason::IdleTimeout);
        }
        idle.len()
    }

    /// Periodically close idle sessions
    ///
    /// Reads the idle window from the config on every tick so runtime
    /// changes take effect without a restart.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        config: ConfigStore,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let relay = self.clone();
        let period = Duration::from_secs(config.get().session.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let idle_secs = config.get().session.idle_timeout_secs;
                        if idle_secs == 0 {
                            continue;
                        }
                        let closed = relay.sweep_idle(Duration::from_secs(idle_secs));
                        if closed > 0 {
                            info!("Idle sweep closing {} session(s)", closed);
                        }
                    }
                }
            }
            debug!("Idle sweeper stopped");
        })
    }

    /// Tear down every live session
    ///
    /// New registrations are refused, each connection is asked to close,
    /// and whatever is still registered after `grace` is torn down here.
    pub async fn shutdown(&self, grace: Duration) {
        self.registry.begin_shutdown();

        let ids = self.registry.ids();
        if ids.is_empty() {
            return;
        }
        info!("Closing {} signaling session(s)", ids.len());
        for id in &ids {
            self.request_close(id, CloseReason::Shutdown);
        }

        let drained = tokio::time::timeout(grace, async {
            while !self.registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;

        if drained.is_err() {
            let stragglers = self.registry.ids();
            warn!(
                "{} session(s) did not close within {:?}, forcing teardown",
                stragglers.len(),
                grace
            );
            for id in &stragglers {
                self.teardown(id, CloseReason::Shutdown).await;
            }
        }
    }
}
