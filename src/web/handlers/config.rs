//! Configuration handlers
//!
//! - GET   /api/config          - active configuration
//! - PATCH /api/config/session  - update session limits at runtime

use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;

use crate::config::{RelayConfig, SessionConfig, SessionConfigUpdate};
use crate::error::Result;
use crate::state::AppState;

/// Get the active configuration
pub async fn get_all_config(State(state): State<Arc<AppState>>) -> Json<RelayConfig> {
    Json((*state.config.get()).clone())
}

/// Update session limits
///
/// Capacity applies to the registry immediately; the idle window is
/// picked up by the sweeper on its next tick.
pub async fn update_session_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionConfigUpdate>,
) -> Result<Json<SessionConfig>> {
    req.validate()?;

    let config = state
        .config
        .update(|config| {
            req.apply_to(&mut config.session);
        })
        .await?;

    state
        .relay
        .registry()
        .set_capacity(config.session.max_sessions);
    info!(
        "Session config updated: max_sessions={}, idle_timeout_secs={}",
        config.session.max_sessions, config.session.idle_timeout_secs
    );

    Ok(Json(config.session.clone()))
}
