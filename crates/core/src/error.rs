use thiserror::Error;

pub type BroadcastResult<T> = Result<T, BroadcastError>;

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability check failed: {0}")]
    CapabilityCheck(#[source] anyhow::Error),

    #[error("Capability check returned {got} results for {expected} addresses")]
    CapabilityMismatch { expected: usize, got: usize },

    #[error("Session listing failed: {0}")]
    SessionListing(#[source] anyhow::Error),

    #[error("Broadcast cancelled")]
    Cancelled,
}
