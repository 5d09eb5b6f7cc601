use serde::{Deserialize, Serialize};

/// Main relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Session lifecycle settings
    pub session: SessionConfig,
    /// Media pipeline connection settings
    pub pipeline: PipelineConfig,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum concurrent signaling sessions
    pub max_sessions: usize,
    /// Close sessions with no signaling traffic in either direction for this long (0 = never)
    pub idle_timeout_secs: u64,
    /// How often the idle sweeper runs
    pub sweep_interval_secs: u64,
    /// Transport ping interval per connection
    pub heartbeat_interval_secs: u64,
    /// Per-connection outbound queue depth
    pub outbound_queue_capacity: usize,
    /// How long shutdown waits for connections to close on their own
    pub shutdown_grace_secs: u64,
    /// After this long an unanswered offer request stops absorbing `get-offer`
    pub offer_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            idle_timeout_secs: 90,
            sweep_interval_secs: 10,
            heartbeat_interval_secs: 30,
            outbound_queue_capacity: 32,
            shutdown_grace_secs: 5,
            offer_timeout_secs: 15,
        }
    }
}

/// Media pipeline connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// WebSocket URL of the media pipeline (None = no pipeline, every offer request fails)
    pub url: Option<String>,
    /// Delay between reconnection attempts
    pub reconnect_interval_secs: u64,
    /// Queue depth for commands waiting to be written to the pipeline
    pub command_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_interval_secs: 3,
            command_queue_capacity: 256,
        }
    }
}

/// Partial update for [`SessionConfig`] (runtime-tunable fields only)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfigUpdate {
    pub max_sessions: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
}

impl SessionConfigUpdate {
    /// Reject values that would leave the relay unusable
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.max_sessions == Some(0) {
            return Err(crate::error::AppError::BadRequest(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn apply_to(&self, config: &mut SessionConfig) {
        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }
        if let Some(idle) = self.idle_timeout_secs {
            config.idle_timeout_secs = idle;
        }
    }
}
