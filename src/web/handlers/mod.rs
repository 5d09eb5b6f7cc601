pub mod config;

use axum::{
    extract::{Path as AxumPath, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, Result};
use crate::signaling::{CloseReason, SessionId, SessionInfo};
use crate::state::AppState;

// ============================================================================
// Health
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub build_date: &'static str,
    pub pipeline: PipelineHealth,
}

#[derive(Serialize)]
pub struct PipelineHealth {
    pub gateway: &'static str,
    pub available: bool,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let gateway = state.relay.gateway();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("BUILD_DATE"),
        pipeline: PipelineHealth {
            gateway: gateway.name(),
            available: gateway.is_available(),
        },
    })
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Serialize)]
pub struct SessionListResponse {
    pub count: usize,
    pub capacity: usize,
    pub sessions: Vec<SessionInfo>,
}

/// Snapshot of live sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionListResponse> {
    let sessions = state.relay.snapshot();
    Json(SessionListResponse {
        count: sessions.len(),
        capacity: state.relay.registry().capacity(),
        sessions,
    })
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<SessionInfo>> {
    state
        .relay
        .registry()
        .lookup(&SessionId::from(id.as_str()))
        .map(|session| Json(session.info()))
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", id)))
}

#[derive(Serialize)]
pub struct CloseResponse {
    pub success: bool,
    pub message: Option<String>,
}

/// Administrative close
///
/// The connection closes itself and runs the normal teardown.
pub async fn close_session(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<CloseResponse>> {
    let session_id = SessionId::from(id.as_str());
    if !state.relay.request_close(&session_id, CloseReason::AdminClosed) {
        return Err(AppError::NotFound(format!("Session {} not found", id)));
    }
    info!("Administrative close requested for {}", session_id);
    Ok(Json(CloseResponse {
        success: true,
        message: Some("Session closing".to_string()),
    }))
}
