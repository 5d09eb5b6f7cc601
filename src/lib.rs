//! camera-relay - camera-scoped WebRTC signaling relay
//!
//! Pairs each remote viewer connection with a negotiation session against
//! an external media pipeline, and relays offers, answers and ICE
//! candidates between them.

pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod signaling;
pub mod state;
pub mod utils;
pub mod web;

pub use error::{AppError, Result};
