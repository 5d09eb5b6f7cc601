mod handlers;
mod monitor;
mod routes;
mod signaling_ws;

pub use routes::create_router;
pub use monitor::monitor_ws_handler;
pub use signaling_ws::signaling_ws_handler;
