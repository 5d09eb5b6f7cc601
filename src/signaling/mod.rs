//! Camera-scoped signaling relay
//!
//! # Architecture
//!
//! ```text
//!  viewer ──ws──► connection ──► MessageRouter ──► PipelineGateway ──► pipeline
//!     ▲              │  ▲                                   │
//!     │              │  └──── Outbound queue ◄── DeliveryChannel ◄── PipelineSink
//!     └──── frames ──┘                 (per session, bounded)
//! ```
//!
//! Each viewer connection owns exactly one session. The connection task
//! is the only writer to its socket and the only mutator of its
//! negotiation state; pipeline results reach it through the session's
//! outbound queue, looked up by id in the [`SessionRegistry`].

pub mod connection;
pub mod delivery;
pub mod negotiation;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;

pub use connection::serve_connection;
pub use delivery::{DeliveryChannel, Outbound};
pub use negotiation::{InvalidSequence, Negotiation, OfferAction};
pub use protocol::{ClientMessage, ErrorReason, IceCandidate, ServerMessage};
pub use registry::SessionRegistry;
pub use relay::SignalingRelay;
pub use router::MessageRouter;
pub use session::{CloseReason, NegotiationState, Session, SessionId, SessionInfo};
