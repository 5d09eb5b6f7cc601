//! Viewer signaling endpoint

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    response::Response,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::signaling::serve_connection;
use crate::state::AppState;

/// WebSocket upgrade handler for `/ws/:source_id`
///
/// One connection is one viewer session on `source_id`.
pub async fn signaling_ws_handler(
    ws: WebSocketUpgrade,
    Path(source_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let heartbeat = Duration::from_secs(state.config.get().session.heartbeat_interval_secs);
    let relay = state.relay.clone();

    ws.on_upgrade(move |socket| async move {
        debug!("Viewer connected for source {}", source_id);
        let (tx, rx) = socket.split();
        serve_connection(relay, source_id, heartbeat, tx, rx).await;
    })
}
