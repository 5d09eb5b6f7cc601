//! Relay configuration: schema and file-backed store

mod schema;
mod store;

pub use schema::{PipelineConfig, RelayConfig, SessionConfig, SessionConfigUpdate, WebConfig};
pub use store::ConfigStore;
