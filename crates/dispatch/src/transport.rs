//! Transport seam — the messaging network the dispatcher drives.
//!
//! Connection setup, encryption and the wire protocol live behind these
//! traits. The dispatcher only needs a bulk reachability check, an
//! enumeration of open sessions, session creation and per-payload send.

use async_trait::async_trait;

/// A reusable conversation with one peer.
#[async_trait]
pub trait Session: Clone + Send + Sync {
    type Payload: Send + Sync;

    fn peer_address(&self) -> &str;

    async fn send(&self, payload: &Self::Payload) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    type Payload: Send + Sync;
    type Session: Session<Payload = Self::Payload>;

    /// Reachability of each address, aligned positionally with the input.
    async fn can_message(&self, addresses: &[String]) -> anyhow::Result<Vec<bool>>;

    /// Sessions that are already open on the transport.
    async fn list_sessions(&self) -> anyhow::Result<Vec<Self::Session>>;

    async fn create_session(&self, address: &str) -> anyhow::Result<Self::Session>;
}
