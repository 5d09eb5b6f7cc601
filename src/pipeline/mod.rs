//! Media pipeline boundary
//!
//! The relay never produces media or session descriptions itself. It asks
//! a [`PipelineGateway`] for them and the gateway answers asynchronously
//! through a [`PipelineSink`].

pub mod gateway;
#[cfg(test)]
pub mod testing;
pub mod unavailable;
pub mod websocket;

pub use gateway::{PipelineGateway, PipelineSink};
pub use unavailable::UnavailableGateway;
pub use websocket::{PipelineCommand, PipelineEvent, WsPipelineGateway};
