use axum::{
    routing::{any, get, patch},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::monitor::monitor_ws_handler;
use super::signaling_ws::signaling_ws_handler;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        // Session observation and administrative close
        .route("/sessions", get(handlers::list_sessions))
        .route(
            "/sessions/:id",
            get(handlers::get_session).delete(handlers::close_session),
        )
        // Configuration
        .route("/config", get(handlers::config::get_all_config))
        .route(
            "/config/session",
            patch(handlers::config::update_session_config),
        )
        // Monitor socket: session snapshot plus live events
        .route("/events", any(monitor_ws_handler));

    Router::new()
        // Viewer signaling, one connection per session
        .route("/ws/:source_id", any(signaling_ws_handler))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, RelayConfig};
    use crate::pipeline::testing::{test_relay, GatewayCall, OfferMode, RecordingGateway};
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::broadcast;
    use tokio_tungstenite::tungstenite::Message;

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn serve(
        capacity: usize,
        mode: OfferMode,
    ) -> (SocketAddr, Arc<AppState>, Arc<RecordingGateway>) {
        let (relay, gateway) = test_relay(capacity, mode);
        let mut config = RelayConfig::default();
        config.session.max_sessions = capacity;
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = AppState::new(
            ConfigStore::ephemeral(config),
            relay.clone(),
            relay.events().clone(),
            shutdown_tx,
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, state, gateway)
    }

    async fn connect(addr: SocketAddr, path: &str) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}{}", addr, path))
            .await
            .unwrap();
        ws
    }

    async fn send(ws: &mut Client, value: Value) {
        ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn recv_json(ws: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out")
                .expect("stream ended")
                .unwrap();
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("expected text, got {:?}", other),
            }
        }
    }

    async fn http_get(addr: SocketAddr, path: &str) -> (u16, Value) {
        http_request(addr, "GET", path, None).await
    }

    /// Minimal HTTP/1.1 client over a raw socket
    async fn http_request(
        addr: SocketAddr,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> (u16, Value) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let request = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            method,
            path,
            addr,
            body.len(),
            body
        );
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let raw = String::from_utf8(raw).unwrap();

        let status = raw[9..12].parse().unwrap();
        let (_, body) = raw.split_once("\r\n\r\n").unwrap();
        let value = serde_json::from_str(body).unwrap_or(Value::Null);
        (status, value)
    }

    async fn wait_for_count(addr: SocketAddr, count: u64) -> Value {
        for _ in 0..100 {
            let (_, body) = http_get(addr, "/api/sessions").await;
            if body["count"] == count {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session count never reached {}", count);
    }

    #[tokio::test]
    async fn test_two_cameras_concurrently() {
        let (addr, _state, gateway) = serve(8, OfferMode::Auto).await;

        let mut one = connect(addr, "/ws/cam-1").await;
        let mut two = connect(addr, "/ws/cam-2").await;
        send(&mut one, json!({"type": "get-offer"})).await;
        send(&mut two, json!({"type": "get-offer"})).await;

        assert_eq!(
            recv_json(&mut one).await,
            json!({"type": "offer", "sdp": "offer-for-cam-1"})
        );
        assert_eq!(
            recv_json(&mut two).await,
            json!({"type": "offer", "sdp": "offer-for-cam-2"})
        );

        send(&mut one, json!({"type": "answer", "sdp": "A1"})).await;
        send(&mut two, json!({"type": "answer", "sdp": "A2"})).await;

        wait_for_count(addr, 2).await;
        let mut answered = None;
        for _ in 0..100 {
            let (_, body) = http_get(addr, "/api/sessions").await;
            let all_answered = body["sessions"]
                .as_array()
                .unwrap()
                .iter()
                .all(|s| s["state"] == "answered");
            if all_answered {
                answered = Some(body);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let body = answered.expect("sessions never reached answered");
        let sessions = body["sessions"].as_array().unwrap();
        let mut sources: Vec<&str> = sessions
            .iter()
            .map(|s| s["source_id"].as_str().unwrap())
            .collect();
        sources.sort();
        assert_eq!(sources, vec!["cam-1", "cam-2"]);

        one.close(None).await.unwrap();
        two.close(None).await.unwrap();
        wait_for_count(addr, 0).await;

        let closed = gateway
            .calls()
            .into_iter()
            .filter(|c| matches!(c, GatewayCall::SessionClosed { .. }))
            .count();
        assert_eq!(closed, 2);
    }

    #[tokio::test]
    async fn test_capacity_refusal_over_http() {
        let (addr, _state, _gateway) = serve(1, OfferMode::Manual).await;

        let _first = connect(addr, "/ws/cam-1").await;
        wait_for_count(addr, 1).await;

        let mut second = connect(addr, "/ws/cam-1").await;
        assert_eq!(
            recv_json(&mut second).await,
            json!({"type": "error", "reason": "capacity-exhausted"})
        );
    }

    #[tokio::test]
    async fn test_session_endpoints() {
        let (addr, _state, gateway) = serve(8, OfferMode::Manual).await;

        let (status, health) = http_get(addr, "/api/health").await;
        assert_eq!(status, 200);
        assert_eq!(health["status"], "ok");
        assert_eq!(health["pipeline"]["gateway"], "recording");

        let (status, _) = http_get(addr, "/api/sessions/nope").await;
        assert_eq!(status, 404);

        let mut viewer = connect(addr, "/ws/cam-9").await;
        let body = wait_for_count(addr, 1).await;
        let id = body["sessions"][0]["session_id"].as_str().unwrap().to_string();
        assert!(id.starts_with("cam-9-"));

        let (status, session) = http_get(addr, &format!("/api/sessions/{}", id)).await;
        assert_eq!(status, 200);
        assert_eq!(session["state"], "new");

        let (status, _) = http_request(addr, "DELETE", &format!("/api/sessions/{}", id), None).await;
        assert_eq!(status, 200);

        // Viewer sees the close frame
        loop {
            match tokio::time::timeout(Duration::from_secs(2), viewer.next()).await.unwrap() {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
        wait_for_count(addr, 0).await;
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_session_config_update() {
        let (addr, state, _gateway) = serve(8, OfferMode::Manual).await;

        let (status, body) = http_request(
            addr,
            "PATCH",
            "/api/config/session",
            Some(json!({"max_sessions": 3, "idle_timeout_secs": 20})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["max_sessions"], 3);
        assert_eq!(state.relay.registry().capacity(), 3);
        assert_eq!(state.config.get().session.idle_timeout_secs, 20);

        let (status, body) = http_request(
            addr,
            "PATCH",
            "/api/config/session",
            Some(json!({"max_sessions": 0})),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);

        let (status, config) = http_get(addr, "/api/config").await;
        assert_eq!(status, 200);
        assert_eq!(config["session"]["max_sessions"], 3);
    }

    #[tokio::test]
    async fn test_event_stream() {
        let (addr, _state, _gateway) = serve(8, OfferMode::Manual).await;
        let mut existing = connect(addr, "/ws/cam-0").await;
        wait_for_count(addr, 1).await;

        let mut events = connect(addr, "/api/events").await;
        send(
            &mut events,
            json!({"type": "subscribe", "payload": {"topics": ["session.*"]}}),
        )
        .await;

        // Subscribing answers with the current picture first
        let snapshot = recv_json(&mut events).await;
        assert_eq!(snapshot["event"], "sessions.snapshot");
        assert_eq!(snapshot["data"]["capacity"], 8);
        assert_eq!(snapshot["data"]["sessions"].as_array().unwrap().len(), 1);
        assert_eq!(snapshot["data"]["sessions"][0]["source_id"], "cam-0");
        let status = recv_json(&mut events).await;
        assert_eq!(status["event"], "pipeline.status");
        assert_eq!(status["data"]["connected"], true);

        let mut viewer = connect(addr, "/ws/cam-1").await;
        let opened = recv_json(&mut events).await;
        assert_eq!(opened["event"], "session.opened");
        assert_eq!(opened["data"]["source_id"], "cam-1");

        send(&mut viewer, json!({"type": "get-offer"})).await;
        let changed = recv_json(&mut events).await;
        assert_eq!(changed["event"], "session.state_changed");
        assert_eq!(changed["data"]["state"], "offer_requested");

        viewer.close(None).await.unwrap();
        let closed = recv_json(&mut events).await;
        assert_eq!(closed["event"], "session.closed");
        assert_eq!(closed["data"]["reason"], "client_closed");

        send(&mut events, json!({"type": "snapshot"})).await;
        let snapshot = recv_json(&mut events).await;
        assert_eq!(snapshot["event"], "sessions.snapshot");
        let sessions = snapshot["data"]["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["source_id"], "cam-0");
        assert_eq!(recv_json(&mut events).await["event"], "pipeline.status");

        existing.close(None).await.unwrap();
    }
}
