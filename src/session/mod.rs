//! Session bookkeeping for a single connection
//!
//! A session is created when a `SessionStart` arrives, becomes Active once the
//! handshake accepts it or Rejected with a reason when it does not, and is
//! Closed when its connection goes away. Only Active sessions enter the table.

mod handshake;

pub use handshake::{Handshake, MAX_SESSION_ID_LEN};

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::protocol::RejectReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Active,
    Rejected,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Session {
    session_id: String,
    api_version: String,
    state: SessionState,
    accepted_at: Option<DateTime<Utc>>,
    reject_reason: Option<RejectReason>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            api_version: api_version.into(),
            state: SessionState::Pending,
            accepted_at: None,
            reject_reason: None,
        }
    }

    pub fn activate(&mut self) {
        self.state = SessionState::Active;
        self.accepted_at = Some(Utc::now());
    }

    pub fn reject(&mut self, reason: RejectReason) {
        self.state = SessionState::Rejected;
        self.reject_reason = Some(reason);
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn accepted_at(&self) -> Option<DateTime<Utc>> {
        self.accepted_at
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        self.reject_reason
    }
}

/// Sessions owned by one connection, keyed by `session_id`.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an active session, replacing any entry with the same id.
    /// Returns `true` when the id was not present before.
    pub fn upsert(&mut self, session: Session) -> bool {
        self.sessions
            .insert(session.session_id.clone(), session)
            .is_none()
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Mark every session Closed and empty the table.
    pub fn close_all(&mut self) -> Vec<Session> {
        self.sessions
            .drain()
            .map(|(_, mut session)| {
                session.close();
                session
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let mut session = Session::new("s1", "1.0");
        assert_eq!(session.state(), SessionState::Pending);
        assert!(session.accepted_at().is_none());

        session.activate();
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.accepted_at().is_some());

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_rejected_session_keeps_reason() {
        let mut session = Session::new("", "1.0");
        session.reject(RejectReason::InvalidSessionId);
        assert_eq!(session.state(), SessionState::Rejected);
        assert_eq!(session.reject_reason(), Some(RejectReason::InvalidSessionId));
        assert!(session.accepted_at().is_none());
    }

    #[test]
    fn test_table_upsert_and_close_all() {
        let mut table = SessionTable::new();
        let mut first = Session::new("s1", "1.0");
        first.activate();
        assert!(table.upsert(first.clone()));
        assert!(!table.upsert(first));
        assert_eq!(table.len(), 1);

        let mut second = Session::new("s2", "1.0");
        second.activate();
        table.upsert(second);

        let closed = table.close_all();
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|s| s.state() == SessionState::Closed));
        assert!(table.is_empty());
    }
}
