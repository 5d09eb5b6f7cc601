//! Shared helpers: socket binding and log throttling.

pub mod net;
pub mod throttle;

pub use net::bind_tcp_listener;
pub use throttle::LogThrottler;
