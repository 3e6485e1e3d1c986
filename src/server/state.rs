//! Server state management.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{RwLock, mpsc};

use crate::{Error, Result};

pub type SessionId = u32;

static SESSION_ID: AtomicU32 = AtomicU32::new(1);

pub fn next_session_id() -> SessionId {
    SESSION_ID.fetch_add(1, Ordering::SeqCst)
}

/// A live connection as seen by other sessions.
#[derive(Debug)]
pub struct SessionEntry {
    pub id: SessionId,
    pub addr: SocketAddr,
    pub handle: Option<String>,

    /// Channel to deliver messages to this session
    pub tx: mpsc::UnboundedSender<String>,
}

impl SessionEntry {
    pub fn send(&self, text: String) -> bool {
        self.tx.send(text).is_ok()
    }
}

/// Every live session plus the handle registry.
///
/// Handles are unique: `handles` maps each one to the single session that
/// owns it, and a session's entry points back to it.
#[derive(Debug, Default)]
pub struct ServerState {
    sessions: HashMap<SessionId, SessionEntry>,
    handles: HashMap<String, SessionId>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&mut self, id: SessionId, addr: SocketAddr, tx: mpsc::UnboundedSender<String>) {
        self.sessions.insert(
            id,
            SessionEntry {
                id,
                addr,
                handle: None,
                tx,
            },
        );
    }

    /// Bind `handle` to session `id`. Check and insert happen under the same
    /// borrow, so callers holding the write lock cannot race.
    pub fn register(&mut self, id: SessionId, handle: &str) -> Result<()> {
        let session = self.sessions.get_mut(&id).ok_or(Error::ConnectionClosed)?;
        if let Some(existing) = &session.handle {
            return Err(Error::AlreadyRegistered(existing.clone()));
        }
        if self.handles.contains_key(handle) {
            return Err(Error::HandleTaken(handle.to_string()));
        }

        session.handle = Some(handle.to_string());
        self.handles.insert(handle.to_string(), id);
        Ok(())
    }

    pub fn remove_session(&mut self, id: SessionId) -> Option<SessionEntry> {
        let session = self.sessions.remove(&id)?;
        if let Some(handle) = &session.handle {
            self.handles.remove(handle);
        }
        Some(session)
    }

    pub fn handle_of(&self, id: SessionId) -> Option<&str> {
        self.sessions.get(&id)?.handle.as_deref()
    }

    pub fn lookup(&self, handle: &str) -> Option<&SessionEntry> {
        let id = self.handles.get(handle)?;
        self.sessions.get(id)
    }

    pub fn is_registered(&self, handle: &str) -> bool {
        self.handles.contains_key(handle)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionEntry> {
        self.sessions.values()
    }

    pub fn registered(&self) -> impl Iterator<Item = &SessionEntry> {
        self.sessions.values().filter(|s| s.handle.is_some())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.handles.clear();
    }
}

pub type SharedState = Arc<RwLock<ServerState>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn state_with(ids: &[SessionId]) -> (ServerState, Vec<mpsc::UnboundedReceiver<String>>) {
        let mut state = ServerState::new();
        let mut receivers = Vec::new();
        for &id in ids {
            let (tx, rx) = mpsc::unbounded_channel();
            state.add_session(id, addr(), tx);
            receivers.push(rx);
        }
        (state, receivers)
    }

    #[test]
    fn test_distinct_handles() {
        let (mut state, _rx) = state_with(&[1, 2]);
        state.register(1, "alice").unwrap();
        state.register(2, "bob").unwrap();
        assert_eq!(state.handle_count(), 2);
        assert_eq!(state.lookup("bob").map(|s| s.id), Some(2));
        assert_eq!(state.handle_of(1), Some("alice"));
    }

    #[test]
    fn test_duplicate_handle_rejected() {
        let (mut state, _rx) = state_with(&[1, 2]);
        state.register(1, "alice").unwrap();
        assert!(matches!(
            state.register(2, "alice"),
            Err(Error::HandleTaken(h)) if h == "alice"
        ));
        assert_eq!(state.handle_of(2), None);
        // Case-sensitive.
        state.register(2, "Alice").unwrap();
    }

    #[test]
    fn test_second_registration_rejected() {
        let (mut state, _rx) = state_with(&[1]);
        state.register(1, "alice").unwrap();
        assert!(matches!(
            state.register(1, "carol"),
            Err(Error::AlreadyRegistered(h)) if h == "alice"
        ));
        assert!(!state.is_registered("carol"));
    }

    #[test]
    fn test_remove_frees_handle() {
        let (mut state, _rx) = state_with(&[1, 2]);
        state.register(1, "alice").unwrap();
        let removed = state.remove_session(1).unwrap();
        assert_eq!(removed.handle.as_deref(), Some("alice"));
        assert!(state.lookup("alice").is_none());
        state.register(2, "alice").unwrap();
        assert_eq!(state.session_count(), 1);
    }

    #[test]
    fn test_lookup_reports_peer_address() {
        let mut state = ServerState::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer: SocketAddr = "10.0.0.7:51000".parse().unwrap();
        state.add_session(9, peer, tx);
        state.register(9, "erin").unwrap();
        assert_eq!(state.lookup("erin").map(|s| s.addr), Some(peer));
    }

    #[test]
    fn test_registered_skips_anonymous() {
        let (mut state, _rx) = state_with(&[1, 2, 3]);
        state.register(3, "carol").unwrap();
        let ids: Vec<_> = state.registered().map(|s| s.id).collect();
        assert_eq!(ids, vec![3]);
        assert_eq!(state.sessions().count(), 3);
    }
}
