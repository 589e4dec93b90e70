//! WebSocket transport for probe sessions
//!
//! This module owns connection lifecycles, the server accept loop,
//! and the registry of live server-side connections.

mod connection;
mod pool;
mod server;

pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, LossReason};
pub use pool::{ConnectionPool, PeerInfo};
pub use server::WebSocketServer;
