//! Monitor socket at `/api/events`
//!
//! Dashboards pick event topics with `subscribe`. Every subscribe, and
//! an explicit `snapshot` request, is answered with the live session
//! list and the pipeline status, so a monitor starts from the full
//! picture instead of replaying history. A monitor that falls behind
//! the event bus is resynchronised with a fresh snapshot.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::RelayEvent;
use crate::state::AppState;

/// Monitor-to-relay command
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
enum MonitorCommand {
    /// Replace the topic list
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    /// Ask for the current session list
    Snapshot,
    Ping,
}

pub async fn monitor_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = state.events.subscribe();
    let mut shutdown_rx = state.shutdown_signal();
    let mut monitor = Monitor::default();

    let period = Duration::from_secs(state.config.get().session.heartbeat_interval_secs.max(1));
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    info!("Monitor connected");

    loop {
        let outgoing = tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => match monitor.apply(&text) {
                    Ok(true) => snapshot(&state),
                    Ok(false) => Vec::new(),
                    Err(e) => {
                        warn!("Bad monitor command: {}", e);
                        Vec::new()
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("Monitor disconnected");
                    break;
                }
                Some(Err(e)) => {
                    warn!("Monitor socket receive error: {}", e);
                    break;
                }
                Some(Ok(_)) => Vec::new(),
            },

            event = event_rx.recv() => match event {
                Ok(event) if monitor.wants(&event) => vec![event],
                Ok(_) => Vec::new(),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Monitor lagged by {} events, resending snapshot", n);
                    if monitor.is_subscribed() {
                        snapshot(&state)
                    } else {
                        Vec::new()
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed");
                    break;
                }
            },

            _ = shutdown_rx.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                Vec::new()
            }
        };

        if send_events(&mut sender, &outgoing).await.is_err() {
            warn!("Failed to write to monitor, disconnecting");
            break;
        }
    }

    debug!("Monitor handler exiting");
}

async fn send_events<S>(sender: &mut S, events: &[RelayEvent]) -> Result<(), S::Error>
where
    S: futures::Sink<Message> + Unpin,
{
    for event in events {
        match serde_json::to_string(event) {
            Ok(json) => sender.send(Message::Text(json)).await?,
            Err(e) => warn!("Failed to encode {}: {}", event.event_name(), e),
        }
    }
    Ok(())
}

/// Session list followed by pipeline status
fn snapshot(state: &AppState) -> Vec<RelayEvent> {
    vec![
        RelayEvent::SessionsSnapshot {
            capacity: state.relay.registry().capacity(),
            sessions: state.relay.snapshot(),
        },
        state.pipeline_status(),
    ]
}

/// Per-socket subscription state
#[derive(Debug, Default)]
struct Monitor {
    topics: Vec<String>,
}

impl Monitor {
    /// Apply one command; true when it should be answered with a snapshot
    fn apply(&mut self, text: &str) -> Result<bool, serde_json::Error> {
        match serde_json::from_str(text)? {
            MonitorCommand::Subscribe { topics } => {
                info!("Monitor subscribed to {:?}", topics);
                self.topics = topics;
                Ok(true)
            }
            MonitorCommand::Unsubscribe { topics } => {
                self.topics.retain(|t| !topics.contains(t));
                debug!("Monitor unsubscribed from {:?}", topics);
                Ok(false)
            }
            MonitorCommand::Snapshot => Ok(true),
            MonitorCommand::Ping => Ok(false),
        }
    }

    fn is_subscribed(&self) -> bool {
        !self.topics.is_empty()
    }

    /// Nothing is streamed until the monitor subscribes
    fn wants(&self, event: &RelayEvent) -> bool {
        self.topics.iter().any(|topic| event.matches_topic(topic))
    }
}
