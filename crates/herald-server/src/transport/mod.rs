//! Transport layer: TLS material and the WebSocket listener.

pub mod tls;
pub mod websocket;
