use std::time::Duration;

use thiserror::Error;

use crate::protocol::RejectReason;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Operation cancelled")]
    Cancelled,
}

// Implement conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::ConfigError(format!("invalid target url: {}", err))
    }
}

// Add conversion from std::io::Error
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Message sending failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("No reply within {0:?}")]
    ReceiveTimeout(Duration),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Failures of [`crate::protocol::decode`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated frame: expected {expected} bytes, got {available}")]
    Truncated { expected: usize, available: usize },

    #[error("unknown envelope kind: 0x{0:02X}")]
    UnknownKind(u8),

    #[error("malformed field `{field}`: {reason}")]
    MalformedField { field: &'static str, reason: String },
}

impl DecodeError {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::MalformedField {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection manager already used")]
    AlreadyConnected,

    #[error("Session rejected ({reason}): {detail}")]
    SessionRejected { reason: RejectReason, detail: String },

    #[error("Envelope exceeds wire limits: {0}")]
    Unencodable(DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::AddrInUse, "address in use");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::InternalError(_)));

        let config_err = config::ConfigError::NotFound(String::from("key not found"));
        let app_err: AppError = config_err.into();
        assert!(matches!(app_err, AppError::ConfigError(_)));

        let parse_err = url::Url::parse("not a url").unwrap_err();
        let app_err: AppError = parse_err.into();
        assert!(matches!(app_err, AppError::ConfigError(_)));

        let app_err: AppError = DecodeError::UnknownKind(9).into();
        assert!(matches!(app_err, AppError::Decode(DecodeError::UnknownKind(9))));
    }

    #[test]
    fn test_error_display() {
        let err = AppError::Protocol(ProtocolError::NotConnected);
        assert_eq!(err.to_string(), "Protocol error: Not connected");

        let err = AppError::Decode(DecodeError::Truncated { expected: 12, available: 3 });
        assert_eq!(
            err.to_string(),
            "Decode error: truncated frame: expected 12 bytes, got 3"
        );

        let err = AppError::Decode(DecodeError::UnknownKind(0xAB));
        assert_eq!(err.to_string(), "Decode error: unknown envelope kind: 0xAB");

        let err = AppError::Protocol(ProtocolError::SessionRejected {
            reason: RejectReason::UnsupportedApiVersion,
            detail: "api version 0.1 is not supported".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Protocol error: Session rejected (unsupported_api_version): api version 0.1 is not supported"
        );
    }
}
