pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod websocket;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use crate::config::Settings;

pub use client::{FixedInterval, Probe, ProbeClient, ProbeOutcome, ProbeReply, RetryPolicy};
pub use protocol::{decode, encode, Envelope};
pub use session::Handshake;
pub use websocket::{ConnectionEvent, ConnectionManager, ConnectionState, WebSocketServer};
