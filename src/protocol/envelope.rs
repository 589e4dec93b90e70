use std::fmt;

/// Wire tag for each envelope variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeKind {
    SessionStart = 0x01,
    SessionAccept = 0x02,
    SessionReject = 0x03,
    Data = 0x04,
    Close = 0x05,
}

impl EnvelopeKind {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::SessionStart),
            0x02 => Some(Self::SessionAccept),
            0x03 => Some(Self::SessionReject),
            0x04 => Some(Self::Data),
            0x05 => Some(Self::Close),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Client request to open a session on this connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub api_version: String,
    pub session_id: String,
}

impl SessionStart {
    pub fn new(session_id: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            session_id: session_id.into(),
        }
    }
}

/// Server answer to an accepted [`SessionStart`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAccept {
    pub session_id: String,
    pub api_version: String,
    /// Feature bitset advertised by the server.
    pub features: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectReason {
    InvalidSessionId = 0x01,
    UnsupportedApiVersion = 0x02,
}

impl RejectReason {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::InvalidSessionId),
            0x02 => Some(Self::UnsupportedApiVersion),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSessionId => f.write_str("invalid_session_id"),
            Self::UnsupportedApiVersion => f.write_str("unsupported_api_version"),
        }
    }
}

/// Server answer to a refused [`SessionStart`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReject {
    pub session_id: String,
    pub reason: RejectReason,
    pub detail: String,
}

/// A single wire message. Exactly one variant is populated at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    SessionStart(SessionStart),
    SessionAccept(SessionAccept),
    SessionReject(SessionReject),
    Data(Vec<u8>),
    Close { reason: String },
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::SessionStart(_) => EnvelopeKind::SessionStart,
            Envelope::SessionAccept(_) => EnvelopeKind::SessionAccept,
            Envelope::SessionReject(_) => EnvelopeKind::SessionReject,
            Envelope::Data(_) => EnvelopeKind::Data,
            Envelope::Close { .. } => EnvelopeKind::Close,
        }
    }
}

impl From<SessionStart> for Envelope {
    fn from(start: SessionStart) -> Self {
        Envelope::SessionStart(start)
    }
}

impl From<SessionAccept> for Envelope {
    fn from(accept: SessionAccept) -> Self {
        Envelope::SessionAccept(accept)
    }
}

impl From<SessionReject> for Envelope {
    fn from(reject: SessionReject) -> Self {
        Envelope::SessionReject(reject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let cases = [
            (Envelope::from(SessionStart::new("s1", "1.0")), EnvelopeKind::SessionStart),
            (
                Envelope::from(SessionAccept {
                    session_id: "s1".into(),
                    api_version: "1.0".into(),
                    features: 0,
                }),
                EnvelopeKind::SessionAccept,
            ),
            (
                Envelope::from(SessionReject {
                    session_id: "s1".into(),
                    reason: RejectReason::InvalidSessionId,
                    detail: String::new(),
                }),
                EnvelopeKind::SessionReject,
            ),
            (Envelope::Data(vec![1, 2, 3]), EnvelopeKind::Data),
            (Envelope::Close { reason: "bye".into() }, EnvelopeKind::Close),
        ];

        for (envelope, kind) in cases {
            assert_eq!(envelope.kind(), kind);
            assert_eq!(EnvelopeKind::from_u8(kind.as_u8()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_bytes() {
        assert_eq!(EnvelopeKind::from_u8(0x00), None);
        assert_eq!(EnvelopeKind::from_u8(0x06), None);
        assert_eq!(RejectReason::from_u8(0x00), None);
        assert_eq!(RejectReason::from_u8(0x03), None);
    }
}
