//! WebSocket transport for depth and trade streams

mod client;
mod manager;

pub use client::WebSocketClient;
pub use manager::{ConnectionState, WebSocketManager};
