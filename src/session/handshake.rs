use crate::config::SessionConfig;
use crate::protocol::{RejectReason, SessionAccept, SessionReject, SessionStart};

use super::{Session, SessionTable};

/// Longest `session_id` the handshake accepts, in bytes.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Validates session-start requests against the versions this side speaks.
#[derive(Debug, Clone)]
pub struct Handshake {
    supported_versions: Vec<String>,
    features: u32,
}

impl Handshake {
    pub fn new<I, S>(supported_versions: I, features: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supported_versions: supported_versions.into_iter().map(Into::into).collect(),
            features,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.supported_versions.iter().cloned(), config.features)
    }

    pub fn supports(&self, api_version: &str) -> bool {
        self.supported_versions.iter().any(|v| v == api_version)
    }

    /// Validate a request without touching any table. The returned session
    /// is Pending when the request is acceptable and Rejected otherwise.
    /// Checks run in order and the first failure wins.
    pub fn check(&self, request: &SessionStart) -> Session {
        let mut session = Session::new(request.session_id.clone(), request.api_version.clone());

        let id_len = request.session_id.len();
        if id_len == 0 || id_len > MAX_SESSION_ID_LEN {
            session.reject(RejectReason::InvalidSessionId);
        } else if !self.supports(&request.api_version) {
            session.reject(RejectReason::UnsupportedApiVersion);
        }
        session
    }

    /// Only an accepted request touches `sessions`; repeating it for the
    /// same id is an upsert.
    pub fn handle_session_start(
        &self,
        sessions: &mut SessionTable,
        request: &SessionStart,
    ) -> Result<SessionAccept, SessionReject> {
        let mut session = self.check(request);

        if let Some(reason) = session.reject_reason() {
            let detail = match reason {
                RejectReason::InvalidSessionId => format!(
                    "session id must be 1 to {} bytes, got {}",
                    MAX_SESSION_ID_LEN,
                    request.session_id.len()
                ),
                RejectReason::UnsupportedApiVersion => {
                    format!("api version {} is not supported", request.api_version)
                }
            };
            return Err(SessionReject {
                session_id: request.session_id.clone(),
                reason,
                detail,
            });
        }

        match sessions.get(&request.session_id) {
            // keep the original accept time on a repeated start
            Some(existing) if existing.api_version() == request.api_version => {}
            _ => {
                session.activate();
                sessions.upsert(session);
            }
        }

        Ok(SessionAccept {
            session_id: request.session_id.clone(),
            api_version: request.api_version.clone(),
            features: self.features,
        })
    }
}
