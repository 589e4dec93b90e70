//! Binary frame layout:
//!
//! ```text
//! +----------+-------------+-------------------------+
//! | kind (1) | len (4, BE) | payload (len bytes)     |
//! +----------+-------------+-------------------------+
//! ```
//!
//! String fields inside the payload are a 4-byte big-endian length followed by
//! UTF-8 bytes. A `Data` payload is the raw data itself.

use crate::error::DecodeError;

use super::envelope::{
    Envelope, EnvelopeKind, RejectReason, SessionAccept, SessionReject, SessionStart,
};

/// Kind byte plus 4-byte payload length.
pub const HEADER_LEN: usize = 5;

/// Longest string field accepted by [`decode`], in bytes.
pub const MAX_FIELD_LEN: usize = 256;

/// Largest payload accepted by [`decode`] (1 MiB).
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;

/// Serialize an envelope into one frame. The output is deterministic.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let mut payload = Vec::new();
    match envelope {
        Envelope::SessionStart(start) => {
            put_str(&mut payload, &start.api_version);
            put_str(&mut payload, &start.session_id);
        }
        Envelope::SessionAccept(accept) => {
            put_str(&mut payload, &accept.session_id);
            put_str(&mut payload, &accept.api_version);
            payload.extend_from_slice(&accept.features.to_be_bytes());
        }
        Envelope::SessionReject(reject) => {
            put_str(&mut payload, &reject.session_id);
            payload.push(reject.reason.as_u8());
            put_str(&mut payload, &reject.detail);
        }
        Envelope::Data(data) => payload.extend_from_slice(data),
        Envelope::Close { reason } => put_str(&mut payload, reason),
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(envelope.kind().as_u8());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Parse exactly one frame.
pub fn decode(buf: &[u8]) -> Result<Envelope, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Truncated {
            expected: HEADER_LEN,
            available: buf.len(),
        });
    }

    let kind = EnvelopeKind::from_u8(buf[0]).ok_or(DecodeError::UnknownKind(buf[0]))?;

    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(DecodeError::malformed(
            "length",
            format!("declared payload of {} bytes exceeds {}", len, MAX_PAYLOAD_LEN),
        ));
    }

    let total = HEADER_LEN + len;
    if buf.len() < total {
        return Err(DecodeError::Truncated {
            expected: total,
            available: buf.len(),
        });
    }
    if buf.len() > total {
        return Err(DecodeError::malformed(
            "frame",
            format!("{} trailing bytes after payload", buf.len() - total),
        ));
    }

    let mut reader = FieldReader::new(&buf[HEADER_LEN..]);
    let envelope = match kind {
        EnvelopeKind::SessionStart => Envelope::SessionStart(SessionStart {
            api_version: reader.string("api_version")?,
            session_id: reader.string("session_id")?,
        }),
        EnvelopeKind::SessionAccept => Envelope::SessionAccept(SessionAccept {
            session_id: reader.string("session_id")?,
            api_version: reader.string("api_version")?,
            features: reader.u32("features")?,
        }),
        EnvelopeKind::SessionReject => {
            let session_id = reader.string("session_id")?;
            let code = reader.u8("reason")?;
            let reason = RejectReason::from_u8(code).ok_or_else(|| {
                DecodeError::malformed("reason", format!("unknown reject code 0x{:02X}", code))
            })?;
            Envelope::SessionReject(SessionReject {
                session_id,
                reason,
                detail: reader.string("detail")?,
            })
        }
        EnvelopeKind::Data => Envelope::Data(reader.rest().to_vec()),
        EnvelopeKind::Close => Envelope::Close {
            reason: reader.string("reason")?,
        },
    };

    reader.finish()?;
    Ok(envelope)
}

/// Report the error [`decode`] would give the peer for this envelope's
/// fields, if any. `encode` itself never fails.
pub fn check_limits(envelope: &Envelope) -> Result<(), DecodeError> {
    let fields: Vec<(&'static str, &str)> = match envelope {
        Envelope::SessionStart(start) => vec![
            ("api_version", start.api_version.as_str()),
            ("session_id", start.session_id.as_str()),
        ],
        Envelope::SessionAccept(accept) => vec![
            ("session_id", accept.session_id.as_str()),
            ("api_version", accept.api_version.as_str()),
        ],
        Envelope::SessionReject(reject) => {
            vec![
                ("session_id", reject.session_id.as_str()),
                ("detail", reject.detail.as_str()),
            ]
        }
        Envelope::Data(data) => {
            if data.len() > MAX_PAYLOAD_LEN {
                return Err(DecodeError::malformed(
                    "length",
                    format!("declared payload of {} bytes exceeds {}", data.len(), MAX_PAYLOAD_LEN),
                ));
            }
            Vec::new()
        }
        Envelope::Close { reason } => vec![("reason", reason.as_str())],
    };

    for (field, value) in fields {
        if value.len() > MAX_FIELD_LEN {
            return Err(DecodeError::malformed(
                field,
                format!("{} bytes exceeds limit of {}", value.len(), MAX_FIELD_LEN),
            ));
        }
    }
    Ok(())
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}

/// Cursor over a payload whose outer length has already been checked.
/// Running out of bytes here means a field disagrees with the frame length.
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.buf.len() - self.pos;
        if n > remaining {
            return Err(DecodeError::malformed(
                field,
                format!("needs {} bytes but only {} remain in payload", n, remaining),
            ));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(field, 1)?[0])
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let bytes = self.take(field, 4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = self.u32(field)? as usize;
        if len > MAX_FIELD_LEN {
            return Err(DecodeError::malformed(
                field,
                format!("{} bytes exceeds limit of {}", len, MAX_FIELD_LEN),
            ));
        }
        let bytes = self.take(field, len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DecodeError::malformed(field, format!("invalid utf-8: {}", e)))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn finish(&self) -> Result<(), DecodeError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(DecodeError::malformed(
                "payload",
                format!("{} unread bytes", self.buf.len() - self.pos),
            ))
        }
    }
}
