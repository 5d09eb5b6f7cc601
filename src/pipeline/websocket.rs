//! WebSocket binding to the media pipeline
//!
//! One long-lived client connection carries commands for every session.
//! Commands are queued without blocking and written by a background
//! task, which also routes the pipeline's replies to the sink and
//! reconnects after failures.
//!
//! Offer requests in flight when the connection drops are failed back
//! as `pipeline-unavailable`. Session-closed notices that cannot be
//! written are held and sent first on the next connection.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::gateway::{PipelineGateway, PipelineSink};
use crate::config::PipelineConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, RelayEvent};
use crate::signaling::{IceCandidate, SessionId};

const UNAVAILABLE: &str = "pipeline-unavailable";

/// Relay to pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PipelineCommand {
    RequestOffer {
        session_id: SessionId,
        source_id: String,
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

/// Pipeline to relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PipelineEvent {
    Offer {
        session_id: SessionId,
        sdp: String,
    },
    IceCandidate {
        session_id: SessionId,
        candidate: IceCandidate,
    },
    OfferFailed {
        session_id: SessionId,
        reason: String,
    },
    #[serde(other)]
    Unknown,
}

/// Production pipeline gateway
pub struct WsPipelineGateway {
    url: String,
    commands: mpsc::Sender<PipelineCommand>,
    connected: Arc<AtomicBool>,
    sink: PipelineSink,
}

impl WsPipelineGateway {
    /// Create the gateway and start its connection task
    ///
    /// The task runs until `cancel` fires.
    pub fn spawn(
        url: impl Into<String>,
        config: &PipelineConfig,
        sink: PipelineSink,
        events: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let url = url.into();
        let (commands, command_rx) = mpsc::channel(config.command_queue_capacity.max(1));
        let connected = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            url: url.clone(),
            reconnect_interval: Duration::from_secs(config.reconnect_interval_secs.max(1)),
            commands: command_rx,
            connected: connected.clone(),
            sink: sink.clone(),
            events,
            cancel,
            last_status: None,
            outstanding: HashSet::new(),
            held_closes: VecDeque::new(),
            max_held: config.command_queue_capacity.max(1),
        };
        let handle = tokio::spawn(worker.run());

        let gateway = Arc::new(Self {
            url,
            commands,
            connected,
            sink,
        });
        (gateway, handle)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn enqueue(&self, command: PipelineCommand) -> Result<()> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::Gateway("pipeline command queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::Gateway("pipeline gateway stopped".to_string())
            }
        })
    }
}

#[async_trait]
impl PipelineGateway for WsPipelineGateway {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn request_offer(&self, source_id: &str, session_id: &SessionId) -> Result<()> {
        if !self.is_available() {
            debug!("Pipeline down, refusing offer for {}", session_id);
            self.sink.offer_failed(session_id, UNAVAILABLE);
            return Ok(());
        }
        self.enqueue(PipelineCommand::RequestOffer {
            session_id: session_id.clone(),
            source_id: source_id.to_string(),
        })
    }

    async fn submit_answer(&self, session_id: &SessionId, sdp: &str) -> Result<()> {
        self.enqueue(PipelineCommand::Answer {
            session_id: session_id.clone(),
            sdp: sdp.to_string(),
        })
    }

    async fn submit_ice_candidate(
        &self,
        session_id: &SessionId,
        candidate: &IceCandidate,
    ) -> Result<()> {
        self.enqueue(PipelineCommand::IceCandidate {
            session_id: session_id.clone(),
            candidate: candidate.clone(),
        })
    }

    async fn notify_session_closed(&self, session_id: &SessionId) {
        if let Err(e) = self.enqueue(PipelineCommand::SessionClosed {
            session_id: session_id.clone(),
        }) {
            error!("Failed to notify pipeline that {} closed: {}", session_id, e);
        }
    }
}

struct Worker {
    url: String,
    reconnect_interval: Duration,
    commands: mpsc::Receiver<PipelineCommand>,
    connected: Arc<AtomicBool>,
    sink: PipelineSink,
    events: Arc<EventBus>,
    cancel: CancellationToken,
    last_status: Option<bool>,
    /// Request-offers written to the current connection with no reply yet
    outstanding: HashSet<SessionId>,
    /// Session-closed notices waiting for a connection
    held_closes: VecDeque<SessionId>,
    max_held: usize,
}

impl Worker {
    async fn run(mut self) {
        info!("Pipeline gateway connecting to {}", self.url);

        loop {
            let connect = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
            };

            let error = match connect {
                Ok((stream, _)) => {
                    info!("Connected to media pipeline at {}", self.url);
                    self.set_status(true, None);
                    let reason = self.serve(stream).await;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    warn!("Pipeline connection lost: {}", reason);
                    self.fail_outstanding();
                    reason
                }
                Err(e) => {
                    if self.last_status != Some(false) {
                        warn!("Cannot reach media pipeline at {}: {}", self.url, e);
                    }
                    e.to_string()
                }
            };
            self.set_status(false, Some(error));

            if !self.backoff().await {
                break;
            }
        }

        self.connected.store(false, Ordering::Release);
        debug!("Pipeline gateway stopped");
    }

    /// Pump one established connection until it fails
    async fn serve<S>(&mut self, stream: S) -> String
    where
        S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let (mut write, mut read) = stream.split();

        while let Some(session_id) = self.held_closes.pop_front() {
            let command = PipelineCommand::SessionClosed { session_id };
            if let Err(e) = Self::write_command(&mut write, &command).await {
                self.reject(command);
                return e.to_string();
            }
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return "gateway stopped".to_string();
                }

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return "command queue closed".to_string();
                    };
                    if let Err(e) = Self::write_command(&mut write, &command).await {
                        self.reject(command);
                        return e.to_string();
                    }
                    match command {
                        PipelineCommand::RequestOffer { session_id, .. } => {
                            self.outstanding.insert(session_id);
                        }
                        PipelineCommand::SessionClosed { session_id } => {
                            self.outstanding.remove(&session_id);
                        }
                        _ => {}
                    }
                }

                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.route(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        return "closed by pipeline".to_string();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return e.to_string(),
                },
            }
        }
    }

    /// Encoding failures are logged and skipped; only transport errors are returned
    async fn write_command<W>(
        write: &mut W,
        command: &PipelineCommand,
    ) -> std::result::Result<(), tokio_tungstenite::tungstenite::Error>
    where
        W: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        match serde_json::to_string(command) {
            Ok(json) => write.send(Message::Text(json)).await,
            Err(e) => {
                error!("Failed to encode pipeline command: {}", e);
                Ok(())
            }
        }
    }

    fn route(&mut self, text: &str) {
        match serde_json::from_str::<PipelineEvent>(text) {
            Ok(PipelineEvent::Offer { session_id, sdp }) => {
                self.outstanding.remove(&session_id);
                self.sink.offer(&session_id, sdp);
            }
            Ok(PipelineEvent::IceCandidate {
                session_id,
                candidate,
            }) => {
                self.sink.ice_candidate(&session_id, candidate);
            }
            Ok(PipelineEvent::OfferFailed { session_id, reason }) => {
                self.outstanding.remove(&session_id);
                self.sink.offer_failed(&session_id, reason);
            }
            Ok(PipelineEvent::Unknown) => debug!("Ignoring unknown pipeline message"),
            Err(e) => warn!("Malformed pipeline message: {}", e),
        }
    }

    /// Wait out the reconnect interval, refusing queued work meanwhile
    ///
    /// Returns false once the gateway should stop.
    async fn backoff(&mut self) -> bool {
        let deadline = tokio::time::sleep(self.reconnect_interval);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut deadline => return true,
                command = self.commands.recv() => match command {
                    Some(command) => self.reject(command),
                    None => return false,
                },
            }
        }
    }

    fn reject(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::RequestOffer { session_id, .. } => {
                self.sink.offer_failed(&session_id, UNAVAILABLE);
            }
            PipelineCommand::SessionClosed { session_id } => {
                self.outstanding.remove(&session_id);
                if self.held_closes.len() >= self.max_held {
                    if let Some(dropped) = self.held_closes.pop_front() {
                        warn!("Too many held session-closed notices, dropping {}", dropped);
                    }
                }
                debug!("Pipeline down, holding session-closed for {}", session_id);
                self.held_closes.push_back(session_id);
            }
            other => debug!("Pipeline down, dropping {:?}", other),
        }
    }

    /// Fail back every offer request the lost connection never answered
    fn fail_outstanding(&mut self) {
        for session_id in self.outstanding.drain() {
            debug!("Failing in-flight offer request for {}", session_id);
            self.sink.offer_failed(&session_id, UNAVAILABLE);
        }
    }

    fn set_status(&mut self, connected: bool, error: Option<String>) {
        self.connected.store(connected, Ordering::Release);
        if self.last_status == Some(connected) {
            return;
        }
        self.last_status = Some(connected);
        self.events.publish(RelayEvent::PipelineStatus { connected, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{DeliveryChannel, Outbound, SessionRegistry};
    use serde_json::json;
    use tokio::net::TcpListener;

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            url: None,
            reconnect_interval_secs: 1,
            command_queue_capacity: 16,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_command_wire_format() {
        let command = PipelineCommand::RequestOffer {
            session_id: SessionId::from("cam-1-abc"),
            source_id: "cam-1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&command).unwrap(),
            json!({"type": "request-offer", "session_id": "cam-1-abc", "source_id": "cam-1"})
        );

        let closed = PipelineCommand::SessionClosed {
            session_id: SessionId::from("cam-1-abc"),
        };
        assert_eq!(
            serde_json::to_value(&closed).unwrap(),
            json!({"type": "session-closed", "session_id": "cam-1-abc"})
        );
    }

    #[test]
    fn test_event_decoding() {
        let event: PipelineEvent = serde_json::from_value(
            json!({"type": "offer-failed", "session_id": "s", "reason": "unknown-source"}),
        )
        .unwrap();
        assert_eq!(
            event,
            PipelineEvent::OfferFailed {
                session_id: SessionId::from("s"),
                reason: "unknown-source".to_string()
            }
        );

        let unknown: PipelineEvent =
            serde_json::from_value(json!({"type": "stats", "fps": 30})).unwrap();
        assert_eq!(unknown, PipelineEvent::Unknown);
    }

    #[tokio::test]
    async fn test_round_trip_with_pipeline_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Fake pipeline: answer each request-offer with an offer and a candidate
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let command: PipelineCommand = serde_json::from_str(&text).unwrap();
                if let PipelineCommand::RequestOffer { session_id, source_id } = &command {
                    let offer = json!({"type": "offer", "session_id": session_id, "sdp": format!("sdp-{}", source_id)});
                    ws.send(Message::Text(offer.to_string())).await.unwrap();
                    let cand = json!({"type": "ice-candidate", "session_id": session_id, "candidate": {"candidate": "c1"}});
                    ws.send(Message::Text(cand.to_string())).await.unwrap();
                }
                let done = matches!(command, PipelineCommand::SessionClosed { .. });
                received.push(command);
                if done {
                    break;
                }
            }
            received
        });

        let registry = Arc::new(SessionRegistry::new(4));
        let sink = PipelineSink::new(DeliveryChannel::new(registry.clone()));
        let events = Arc::new(EventBus::new());
        let mut status = events.subscribe();
        let cancel = CancellationToken::new();
        let (gateway, task) = WsPipelineGateway::spawn(
            format!("ws://{}", addr),
            &test_config(),
            sink,
            events,
            cancel.clone(),
        );

        let gw = gateway.clone();
        wait_until(move || gw.is_available()).await;
        assert!(matches!(
            status.recv().await.unwrap(),
            RelayEvent::PipelineStatus { connected: true, .. }
        ));

        let (tx, mut rx) = mpsc::channel(8);
        let id = registry.register("cam-1", tx).unwrap();
        gateway.request_offer("cam-1", &id).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Outbound::Offer {
                sdp: "sdp-cam-1".to_string()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(Outbound::IceCandidate(IceCandidate::from_line("c1")))
        );

        gateway.submit_answer(&id, "A1").await.unwrap();
        gateway.notify_session_closed(&id).await;

        let received = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.len(), 3);
        assert_eq!(
            received[1],
            PipelineCommand::Answer {
                session_id: id.clone(),
                sdp: "A1".to_string()
            }
        );

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_pipeline_refuses_offers() {
        // Reserve a port, then free it so nothing is listening
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let registry = Arc::new(SessionRegistry::new(4));
        let sink = PipelineSink::new(DeliveryChannel::new(registry.clone()));
        let events = Arc::new(EventBus::new());
        let mut status = events.subscribe();
        let cancel = CancellationToken::new();
        let (gateway, task) = WsPipelineGateway::spawn(
            format!("ws://{}", addr),
            &test_config(),
            sink,
            events,
            cancel.clone(),
        );

        let event = tokio::time::timeout(Duration::from_secs(5), status.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            RelayEvent::PipelineStatus {
                connected: false,
                error: Some(_)
            }
        ));
        assert!(!gateway.is_available());

        let (tx, mut rx) = mpsc::channel(8);
        let id = registry.register("cam-1", tx).unwrap();
        gateway.request_offer("cam-1", &id).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(Outbound::OfferFailed {
                reason: UNAVAILABLE.to_string()
            })
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_lost_connection_fails_offers_and_holds_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // First connection takes one request-offer and drops without replying;
        // the second records what arrives until a session-closed
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let first = loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        break serde_json::from_str::<PipelineCommand>(&text).unwrap()
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected frame: {:?}", other),
                }
            };
            drop(ws);

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let command: PipelineCommand = serde_json::from_str(&text).unwrap();
                let done = matches!(command, PipelineCommand::SessionClosed { .. });
                received.push(command);
                if done {
                    break;
                }
            }
            (first, received)
        });

        let registry = Arc::new(SessionRegistry::new(4));
        let sink = PipelineSink::new(DeliveryChannel::new(registry.clone()));
        let cancel = CancellationToken::new();
        let (gateway, task) = WsPipelineGateway::spawn(
            format!("ws://{}", addr),
            &test_config(),
            sink,
            Arc::new(EventBus::new()),
            cancel.clone(),
        );
        let gw = gateway.clone();
        wait_until(move || gw.is_available()).await;

        let (tx, mut rx) = mpsc::channel(8);
        let id = registry.register("cam-1", tx).unwrap();
        gateway.request_offer("cam-1", &id).await.unwrap();

        let failed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(
            failed,
            Some(Outbound::OfferFailed {
                reason: UNAVAILABLE.to_string()
            })
        );

        // Closed while the pipeline is away; delivered after reconnect
        let gw = gateway.clone();
        wait_until(move || !gw.is_available()).await;
        gateway.notify_session_closed(&id).await;

        let (first, received) = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            first,
            PipelineCommand::RequestOffer {
                session_id: id.clone(),
                source_id: "cam-1".to_string()
            }
        );
        assert_eq!(
            received,
            vec![PipelineCommand::SessionClosed { session_id: id }]
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_is_gateway_error() {
        let registry = Arc::new(SessionRegistry::new(4));
        let (commands, _command_rx) = mpsc::channel(1);
        let gateway = WsPipelineGateway {
            url: "ws://unused".to_string(),
            commands,
            connected: Arc::new(AtomicBool::new(true)),
            sink: PipelineSink::new(DeliveryChannel::new(registry)),
        };
        let id = SessionId::from("cam-1-x");

        gateway.submit_answer(&id, "A1").await.unwrap();
        let err = gateway.submit_answer(&id, "A2").await.unwrap_err();
        assert!(matches!(err, AppError::Gateway(_)));
    }
}
