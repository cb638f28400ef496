//! In-memory loopback transport. Accepts every send and records it, with
//! knobs for unreachable peers, pre-opened sessions and injected failures.
//! Backs the CLI dry runs and the dispatcher tests.

use crate::transport::{Session, Transport};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

struct MemoryState<P> {
    unreachable: HashSet<String>,
    open_sessions: Vec<String>,
    send_failures: HashMap<String, usize>,
    session_failures: HashMap<String, usize>,
    capability_check_fails: bool,
    session_listing_fails: bool,
    capability_queries: Vec<Vec<String>>,
    sessions_created: Vec<String>,
    deliveries: Vec<(String, P)>,
}

impl<P> Default for MemoryState<P> {
    fn default() -> Self {
        Self {
            unreachable: HashSet::new(),
            open_sessions: Vec::new(),
            send_failures: HashMap::new(),
            session_failures: HashMap::new(),
            capability_check_fails: false,
            session_listing_fails: false,
            capability_queries: Vec::new(),
            sessions_created: Vec::new(),
            deliveries: Vec::new(),
        }
    }
}

/// Loopback transport with shared, inspectable state.
pub struct MemoryTransport<P> {
    state: Arc<Mutex<MemoryState<P>>>,
}

impl<P> Default for MemoryTransport<P> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }
}

impl<P> Clone for MemoryTransport<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<P: Clone> MemoryTransport<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses that fail the capability check.
    pub fn with_unreachable<I, S>(self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .unreachable
            .extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Peers that already have an open session when the run starts.
    pub fn with_open_sessions<I, S>(self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .open_sessions
            .extend(addresses.into_iter().map(Into::into));
        self
    }

    /// The next `times` sends to `address` fail.
    pub fn with_send_failures(self, address: impl Into<String>, times: usize) -> Self {
        self.lock().send_failures.insert(address.into(), times);
        self
    }

    /// The next `times` session creations for `address` fail.
    pub fn with_session_failures(self, address: impl Into<String>, times: usize) -> Self {
        self.lock().session_failures.insert(address.into(), times);
        self
    }

    /// Every bulk capability check fails.
    pub fn with_failing_capability_check(self) -> Self {
        self.lock().capability_check_fails = true;
        self
    }

    /// Listing open sessions fails.
    pub fn with_failing_session_listing(self) -> Self {
        self.lock().session_listing_fails = true;
        self
    }

    /// Address lists passed to each capability check, in call order.
    pub fn capability_queries(&self) -> Vec<Vec<String>> {
        self.lock().capability_queries.clone()
    }

    /// Addresses for which a new session was created, in call order.
    pub fn sessions_created(&self) -> Vec<String> {
        self.lock().sessions_created.clone()
    }

    /// Every accepted payload with its recipient, in send order.
    pub fn deliveries(&self) -> Vec<(String, P)> {
        self.lock().deliveries.clone()
    }

    pub fn delivered_to(&self, address: &str) -> usize {
        self.lock()
            .deliveries
            .iter()
            .filter(|(to, _)| to == address)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState<P>> {
        self.state.lock().expect("memory transport mutex poisoned")
    }

    fn session_for(&self, address: &str) -> MemorySession<P> {
        MemorySession {
            peer: address.to_string(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Consumes one injected failure for `address`, if any remain.
fn take_failure(failures: &mut HashMap<String, usize>, address: &str) -> bool {
    match failures.get_mut(address) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

pub struct MemorySession<P> {
    peer: String,
    state: Arc<Mutex<MemoryState<P>>>,
}

impl<P> Clone for MemorySession<P> {
    fn clone(&self) -> Self {
        Self {
            peer: self.peer.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl<P> Session for MemorySession<P>
where
    P: Clone + Send + Sync + 'static,
{
    type Payload = P;

    fn peer_address(&self) -> &str {
        &self.peer
    }

    async fn send(&self, payload: &P) -> anyhow::Result<()> {
        let mut state = self.state.lock().expect("memory transport mutex poisoned");
        if take_failure(&mut state.send_failures, &self.peer) {
            bail!("send to {} rejected by transport", self.peer);
        }
        state.deliveries.push((self.peer.clone(), payload.clone()));
        debug!(to = %self.peer, "Loopback message delivered");
        Ok(())
    }
}

#[async_trait]
impl<P> Transport for MemoryTransport<P>
where
    P: Clone + Send + Sync + 'static,
{
    type Payload = P;
    type Session = MemorySession<P>;

    async fn can_message(&self, addresses: &[String]) -> anyhow::Result<Vec<bool>> {
        let mut state = self.lock();
        state.capability_queries.push(addresses.to_vec());
        if state.capability_check_fails {
            return Err(anyhow!("capability lookup unavailable"));
        }
        Ok(addresses
            .iter()
            .map(|address| !state.unreachable.contains(address))
            .collect())
    }

    async fn list_sessions(&self) -> anyhow::Result<Vec<MemorySession<P>>> {
        let peers = {
            let state = self.lock();
            if state.session_listing_fails {
                bail!("session listing unavailable");
            }
            state.open_sessions.clone()
        };
        Ok(peers.iter().map(|peer| self.session_for(peer)).collect())
    }

    async fn create_session(&self, address: &str) -> anyhow::Result<MemorySession<P>> {
        {
            let mut state = self.lock();
            if take_failure(&mut state.session_failures, address) {
                bail!("session setup with {address} failed");
            }
            state.sessions_created.push(address.to_string());
        }
        Ok(self.session_for(address))
    }
}
