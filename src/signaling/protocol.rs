//! Viewer-facing signaling envelope
//!
//! Every frame is a JSON object tagged by `type`:
//!
//! ```text
//! viewer -> relay   {"type":"get-offer"}
//!                   {"type":"answer","sdp":"..."}
//!                   {"type":"ice-candidate","candidate":{...}}
//! relay -> viewer   {"type":"offer","sdp":"..."}
//!                   {"type":"ice-candidate","candidate":{...}}
//!                   {"type":"error","reason":"invalid-sequence"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Connectivity candidate, opaque to the relay
///
/// Only required to be a JSON object; the fields (`candidate`, `sdpMid`,
/// `sdpMLineIndex`, ...) are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IceCandidate(pub Map<String, Value>);

impl IceCandidate {
    /// Build a candidate with just the `candidate` line
    pub fn from_line(line: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("candidate".to_string(), Value::String(line.into()));
        Self(fields)
    }

    /// The `candidate` attribute line, if present
    pub fn line(&self) -> Option<&str> {
        self.0.get("candidate").and_then(Value::as_str)
    }
}

/// Message from a viewer
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Ask the pipeline for a session description
    GetOffer,
    /// Viewer's session description
    Answer { sdp: String },
    /// Viewer's connectivity candidate
    IceCandidate { candidate: IceCandidate },
    /// Any other `type`; ignored
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetOffer => "get-offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Unknown => "unknown",
        }
    }
}

/// Machine-readable error codes sent to viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorReason {
    /// Message arrived in a state that does not accept it
    InvalidSequence,
    /// Registry full; the connection is refused
    CapacityExhausted,
    /// Relay is shutting down; the connection is refused
    ShuttingDown,
}

/// Message to a viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Offer { sdp: String },
    IceCandidate { candidate: IceCandidate },
    Error { reason: ErrorReason },
}

impl ServerMessage {
    pub fn error(reason: ErrorReason) -> Self {
        Self::Error { reason }
    }
}

/// Decode one inbound text frame
pub fn decode(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Encode one outbound message
pub fn encode(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
