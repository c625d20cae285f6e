//! WebSocket layer: connection hub and the upgrade handler.

mod handler;
mod hub;

pub use handler::ws_handler;
pub use hub::{ConnectionHub, ConnectionId};
