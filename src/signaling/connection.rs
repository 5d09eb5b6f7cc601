//! Per-connection handler
//!
//! Owns one viewer socket: reads frames, feeds decoded messages to the
//! router in arrival order, drains the session's outbound queue, pings
//! the peer, and tears the session down exactly once when any of those
//! ends the connection.
//!
//! Only signaling traffic counts as session activity for the idle sweep.
//! Pongs and other control frames merely prove the peer is still there.

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::delivery::Outbound;
use super::protocol::{self, ErrorReason, ServerMessage};
use super::relay::SignalingRelay;
use super::router::MessageRouter;
use super::session::{CloseReason, SessionId};
use crate::error::AppError;
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Accept a viewer connection for `source_id` and run it to completion
///
/// If the registry refuses the session the viewer gets an `error`
/// envelope and a close frame, and no session exists.
pub async fn serve_connection<Tx, Rx, E>(
    relay: Arc<SignalingRelay>,
    source_id: String,
    heartbeat: Duration,
    mut tx: Tx,
    rx: Rx,
) where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (session_id, outbound_rx) = match relay.open_session(&source_id) {
        Ok(opened) => opened,
        Err(e) => {
            warn!("Refusing viewer for {}: {}", source_id, e);
            let reason = match e {
                AppError::ShuttingDown => ErrorReason::ShuttingDown,
                _ => ErrorReason::CapacityExhausted,
            };
            let _ = send_message(&mut tx, &ServerMessage::error(reason)).await;
            let _ = tx
                .send(close_frame(close_code::AGAIN, "session refused"))
                .await;
            return;
        }
    };

    let handler = ConnectionHandler {
        router: MessageRouter::new(relay.clone(), session_id.clone(), source_id),
        relay,
        session_id,
        heartbeat,
        throttler: LogThrottler::with_secs(10),
    };
    handler.run(outbound_rx, tx, rx).await;
}

/// Heartbeat periods without any frame from the peer before it is dropped
const UNANSWERED_PINGS: u32 = 3;

struct ConnectionHandler {
    relay: Arc<SignalingRelay>,
    session_id: SessionId,
    router: MessageRouter,
    heartbeat: Duration,
    throttler: LogThrottler,
}

impl ConnectionHandler {
    async fn run<Tx, Rx, E>(
        mut self,
        mut outbound_rx: mpsc::Receiver<Outbound>,
        mut tx: Tx,
        mut rx: Rx,
    )
    where
        Tx: Sink<Message> + Unpin,
        Tx::Error: Display,
        Rx: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let period = self.heartbeat.max(Duration::from_millis(100));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        let unresponsive_after = period * UNANSWERED_PINGS;
        let mut last_seen = Instant::now();

        let reason = loop {
            tokio::select! {
                frame = rx.next() => {
                    if matches!(frame, Some(Ok(_))) {
                        last_seen = Instant::now();
                    }
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.relay.registry().touch(&self.session_id);
                            if let Some(reply) = self.on_text(&text).await {
                                if let Err(e) = send_message(&mut tx, &reply).await {
                                    warn!("Write to {} failed: {}", self.session_id, e);
                                    break CloseReason::TransportError;
                                }
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            warn_throttled!(
                                self.throttler,
                                "binary",
                                "Ignoring {} byte binary frame on {}",
                                data.len(),
                                self.session_id
                            );
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            break CloseReason::ClientClosed;
                        }
                        Some(Err(e)) => {
                            warn!("Receive error on {}: {}", self.session_id, e);
                            break CloseReason::TransportError;
                        }
                    }
                }

                outbound = outbound_rx.recv() => match outbound {
                    Some(Outbound::Close(reason)) => {
                        let _ = tx.send(close_frame(close_code_for(reason), &reason.to_string())).await;
                        break reason;
                    }
                    Some(outbound) => {
                        if let Some(message) = self.router.handle_outbound(outbound) {
                            self.relay.registry().touch(&self.session_id);
                            if let Err(e) = send_message(&mut tx, &message).await {
                                warn!("Write to {} failed: {}", self.session_id, e);
                                break CloseReason::TransportError;
                            }
                        }
                    }
                    // Registry dropped our entry: torn down from outside
                    None => break CloseReason::Shutdown,
                },

                _ = heartbeat.tick() => {
                    if last_seen.elapsed() >= unresponsive_after {
                        warn!(
                            "Viewer on {} unresponsive for {:?}, dropping",
                            self.session_id,
                            last_seen.elapsed()
                        );
                        break CloseReason::TransportError;
                    }
                    if let Err(e) = tx.send(Message::Ping(Vec::new())).await {
                        warn!("Ping to {} failed: {}", self.session_id, e);
                        break CloseReason::TransportError;
                    }
                }
            }
        };

        self.router.close();
        if self.relay.teardown(&self.session_id, reason).await {
            debug!("Connection for {} finished ({})", self.session_id, reason);
        } else {
            info!("Connection for {} finished after external teardown", self.session_id);
        }
    }

    /// Decode and route one text frame
    ///
    /// Malformed frames are logged and dropped; the connection stays open.
    async fn on_text(&mut self, text: &str) -> Option<ServerMessage> {
        match protocol::decode(text) {
            Ok(message) => self.router.handle_client_message(message).await,
            Err(e) => {
                warn_throttled!(
                    self.throttler,
                    "decode",
                    "Malformed signaling message on {}: {}",
                    self.session_id,
                    e
                );
                None
            }
        }
    }
}

async fn send_message<Tx>(tx: &mut Tx, message: &ServerMessage) -> Result<(), String>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    let json = protocol::encode(message).map_err(|e| e.to_string())?;
    tx.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

fn close_frame(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}

fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::Shutdown => close_code::AWAY,
        _ => close_code::NORMAL,
    }
}
