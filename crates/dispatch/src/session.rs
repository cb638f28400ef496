//! Session cache — one open session per recipient, created on first use.

use crate::transport::{Session, Transport};
use std::collections::HashMap;
use tracing::debug;

pub struct SessionCache<S> {
    sessions: HashMap<String, S>,
}

impl<S> Default for SessionCache<S> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<S: Session> SessionCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session opened elsewhere, keyed by its peer.
    pub fn insert(&mut self, session: S) {
        self.sessions
            .insert(session.peer_address().to_string(), session);
    }

    pub fn contains(&self, address: &str) -> bool {
        self.sessions.contains_key(address)
    }

    /// Cached session for `address`, or a new one from the transport.
    /// A failed creation leaves the cache untouched.
    pub async fn get_or_create<T>(&mut self, transport: &T, address: &str) -> anyhow::Result<S>
    where
        T: Transport<Session = S>,
    {
        if let Some(session) = self.sessions.get(address) {
            return Ok(session.clone());
        }
        let session = transport.create_session(address).await?;
        debug!(address = %address, "Session created");
        self.sessions.insert(address.to_string(), session.clone());
        Ok(session)
    }

    pub fn evict(&mut self, address: &str) -> Option<S> {
        self.sessions.remove(address)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
