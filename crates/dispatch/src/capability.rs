//! Capability cache — recipients known to be reachable on the transport.
//!
//! Only addresses not already cached are sent to the bulk capability check.
//! Results merge additively; an entry leaves the cache only through explicit
//! eviction after a successful send.

use crate::transport::Transport;
use broadcast_core::{BroadcastError, BroadcastResult};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Default)]
pub struct CapabilityCache {
    reachable: HashSet<String>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache seeded with addresses confirmed reachable by an earlier process.
    pub fn seeded<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reachable: addresses.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.reachable.contains(address)
    }

    /// Check every uncached address in `addresses` and merge the reachable
    /// ones into the cache. Returns the newly confirmed addresses in input
    /// order.
    pub async fn resolve<T: Transport>(
        &mut self,
        transport: &T,
        addresses: &[String],
    ) -> BroadcastResult<Vec<String>> {
        let unknown: Vec<String> = addresses
            .iter()
            .filter(|address| !self.reachable.contains(*address))
            .cloned()
            .collect();
        if unknown.is_empty() {
            return Ok(Vec::new());
        }

        let results = transport
            .can_message(&unknown)
            .await
            .map_err(BroadcastError::CapabilityCheck)?;
        if results.len() != unknown.len() {
            return Err(BroadcastError::CapabilityMismatch {
                expected: unknown.len(),
                got: results.len(),
            });
        }

        let confirmed: Vec<String> = unknown
            .into_iter()
            .zip(results)
            .filter_map(|(address, reachable)| reachable.then_some(address))
            .collect();
        self.reachable.extend(confirmed.iter().cloned());

        debug!(
            checked = addresses.len(),
            confirmed = confirmed.len(),
            cached = self.reachable.len(),
            "Capability cache updated"
        );
        Ok(confirmed)
    }

    pub fn evict(&mut self, address: &str) -> bool {
        self.reachable.remove(address)
    }

    /// Snapshot of every cached address, sorted for stable export.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.reachable.iter().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.reachable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reachable.is_empty()
    }
}
