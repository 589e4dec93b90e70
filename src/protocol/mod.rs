//! Wire protocol for probe sessions
//!
//! Envelopes are the only message type exchanged over the socket. Each one
//! travels as a single binary WebSocket message holding one length-delimited
//! frame produced by [`encode`].

mod codec;
mod envelope;

pub use codec::{check_limits, decode, encode, HEADER_LEN, MAX_FIELD_LEN, MAX_PAYLOAD_LEN};
pub use envelope::{
    Envelope, EnvelopeKind, RejectReason, SessionAccept, SessionReject, SessionStart,
};
