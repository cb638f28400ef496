//! Broadcast observer — optional lifecycle callbacks.
//!
//! Callbacks run synchronously on the dispatch loop and have no effect on
//! control flow. A slow callback stalls the run; a panicking one unwinds
//! through `broadcast`.

use broadcast_core::{BroadcastError, BroadcastEvent, EventSink};
use std::sync::Arc;
use std::time::Duration;

pub type AddressesCallback = Arc<dyn Fn(&[String]) + Send + Sync>;
pub type AddressCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type CompleteCallback = Arc<dyn Fn() + Send + Sync>;
pub type AbortCallback = Arc<dyn Fn(&BroadcastError) + Send + Sync>;
pub type DelayCallback = Arc<dyn Fn(Duration) + Send + Sync>;

#[derive(Clone, Default)]
pub struct BroadcastObserver {
    on_batch_start: Option<AddressesCallback>,
    on_batch_complete: Option<AddressesCallback>,
    on_broadcast_complete: Option<CompleteCallback>,
    on_broadcast_aborted: Option<AbortCallback>,
    on_cant_message_address: Option<AddressCallback>,
    on_message_sending: Option<AddressCallback>,
    on_message_sent: Option<AddressCallback>,
    on_message_failed: Option<AddressCallback>,
    on_can_message_addresses_update: Option<AddressesCallback>,
    on_delay: Option<DelayCallback>,
}

impl BroadcastObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer that forwards every callback into `sink` as a tagged event.
    pub fn from_sink(sink: Arc<dyn EventSink>) -> Self {
        let mut observer = Self::default();

        let s = Arc::clone(&sink);
        observer.set_on_batch_start(move |addresses| {
            s.emit(BroadcastEvent::BatchStart {
                addresses: addresses.to_vec(),
            })
        });
        let s = Arc::clone(&sink);
        observer.set_on_batch_complete(move |addresses| {
            s.emit(BroadcastEvent::BatchComplete {
                addresses: addresses.to_vec(),
            })
        });
        let s = Arc::clone(&sink);
        observer.set_on_broadcast_complete(move || s.emit(BroadcastEvent::BroadcastComplete));
        let s = Arc::clone(&sink);
        observer.set_on_broadcast_aborted(move |err| {
            s.emit(BroadcastEvent::BroadcastAborted {
                reason: err.to_string(),
            })
        });
        let s = Arc::clone(&sink);
        observer.set_on_cant_message_address(move |address| {
            s.emit(BroadcastEvent::AddressUnreachable {
                address: address.to_string(),
            })
        });
        let s = Arc::clone(&sink);
        observer.set_on_message_sending(move |address| {
            s.emit(BroadcastEvent::MessageSending {
                address: address.to_string(),
            })
        });
        let s = Arc::clone(&sink);
        observer.set_on_message_sent(move |address| {
            s.emit(BroadcastEvent::MessageSent {
                address: address.to_string(),
            })
        });
        let s = Arc::clone(&sink);
        observer.set_on_message_failed(move |address| {
            s.emit(BroadcastEvent::MessageFailed {
                address: address.to_string(),
            })
        });
        let s = Arc::clone(&sink);
        observer.set_on_can_message_addresses_update(move |addresses| {
            s.emit(BroadcastEvent::CapabilityUpdated {
                addresses: addresses.to_vec(),
            })
        });
        observer.set_on_delay(move |delay| {
            sink.emit(BroadcastEvent::Delay {
                ms: delay.as_millis() as u64,
            })
        });

        observer
    }

    // ─── Setters ────────────────────────────────────────────────────────────

    /// Called when a batch of addresses is about to be sent.
    pub fn set_on_batch_start(&mut self, f: impl Fn(&[String]) + Send + Sync + 'static) {
        self.on_batch_start = Some(Arc::new(f));
    }

    /// Called when every address in a batch has been sent or has failed.
    pub fn set_on_batch_complete(&mut self, f: impl Fn(&[String]) + Send + Sync + 'static) {
        self.on_batch_complete = Some(Arc::new(f));
    }

    /// Called once per run, after the retry pass.
    pub fn set_on_broadcast_complete(&mut self, f: impl Fn() + Send + Sync + 'static) {
        self.on_broadcast_complete = Some(Arc::new(f));
    }

    /// Called instead of broadcast-complete when the run ends with an error.
    pub fn set_on_broadcast_aborted(
        &mut self,
        f: impl Fn(&BroadcastError) + Send + Sync + 'static,
    ) {
        self.on_broadcast_aborted = Some(Arc::new(f));
    }

    pub fn set_on_cant_message_address(&mut self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.on_cant_message_address = Some(Arc::new(f));
    }

    /// Called before each individual payload send.
    pub fn set_on_message_sending(&mut self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.on_message_sending = Some(Arc::new(f));
    }

    pub fn set_on_message_sent(&mut self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.on_message_sent = Some(Arc::new(f));
    }

    pub fn set_on_message_failed(&mut self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.on_message_failed = Some(Arc::new(f));
    }

    /// Called with the addresses newly confirmed reachable in a batch, so
    /// callers can persist them and seed the next process.
    pub fn set_on_can_message_addresses_update(
        &mut self,
        f: impl Fn(&[String]) + Send + Sync + 'static,
    ) {
        self.on_can_message_addresses_update = Some(Arc::new(f));
    }

    /// Called right before every pacing delay.
    pub fn set_on_delay(&mut self, f: impl Fn(Duration) + Send + Sync + 'static) {
        self.on_delay = Some(Arc::new(f));
    }

    // ─── Notifications ──────────────────────────────────────────────────────

    pub(crate) fn batch_start(&self, addresses: &[String]) {
        if let Some(f) = &self.on_batch_start {
            f(addresses);
        }
    }

    pub(crate) fn batch_complete(&self, addresses: &[String]) {
        if let Some(f) = &self.on_batch_complete {
            f(addresses);
        }
    }

    pub(crate) fn broadcast_complete(&self) {
        if let Some(f) = &self.on_broadcast_complete {
            f();
        }
    }

    pub(crate) fn broadcast_aborted(&self, err: &BroadcastError) {
        if let Some(f) = &self.on_broadcast_aborted {
            f(err);
        }
    }

    pub(crate) fn cant_message_address(&self, address: &str) {
        if let Some(f) = &self.on_cant_message_address {
            f(address);
        }
    }

    pub(crate) fn message_sending(&self, address: &str) {
        if let Some(f) = &self.on_message_sending {
            f(address);
        }
    }

    pub(crate) fn message_sent(&self, address: &str) {
        if let Some(f) = &self.on_message_sent {
            f(address);
        }
    }

    pub(crate) fn message_failed(&self, address: &str) {
        if let Some(f) = &self.on_message_failed {
            f(address);
        }
    }

    pub(crate) fn can_message_addresses_update(&self, addresses: &[String]) {
        if let Some(f) = &self.on_can_message_addresses_update {
            f(addresses);
        }
    }

    pub(crate) fn delay(&self, delay: Duration) {
        if let Some(f) = &self.on_delay {
            f(delay);
        }
    }
}
