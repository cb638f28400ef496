//! Broadcast dispatcher — drives one paced, quota-aware run over the
//! recipient list.
//!
//! A run moves through preflight (open-session accounting and an optional
//! initial delay), planning, the batch loop (capability resolution, send,
//! pacing) and a single retry pass over the recipients that failed.
//! Progress is reported only through the [`BroadcastObserver`].

use crate::capability::CapabilityCache;
use crate::observer::BroadcastObserver;
use crate::planner::BatchPlanner;
use crate::session::SessionCache;
use crate::transport::{Session, Transport};
use crate::weight::WeightModel;
use broadcast_core::{BroadcastConfig, BroadcastError, BroadcastResult};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastOptions {
    /// Skip the preflight delay even when open sessions press on the
    /// provider-wide ceiling.
    pub skip_initial_delay: bool,
}

/// Delivers a fixed payload sequence to every reachable recipient.
///
/// Caches persist across runs on the same instance. `broadcast` borrows the
/// dispatcher mutably, so runs on one instance are always sequential.
pub struct BroadcastDispatcher<T: Transport> {
    transport: T,
    recipients: Vec<String>,
    config: BroadcastConfig,
    planner: BatchPlanner,
    batches: Vec<Vec<String>>,
    failures: Vec<String>,
    capabilities: CapabilityCache,
    sessions: SessionCache<T::Session>,
    observer: BroadcastObserver,
    cancel: Option<CancellationToken>,
}

impl<T: Transport> BroadcastDispatcher<T> {
    pub fn new(
        transport: T,
        recipients: Vec<String>,
        config: BroadcastConfig,
    ) -> BroadcastResult<Self> {
        config.validate()?;
        info!(
            recipients = recipients.len(),
            rate_limit_amount = config.rate_limit_amount,
            rate_limit_time_ms = config.rate_limit_time_ms,
            "Broadcast dispatcher initialized"
        );
        Ok(Self {
            transport,
            recipients,
            planner: BatchPlanner::new(WeightModel::from_config(&config)),
            config,
            batches: Vec::new(),
            failures: Vec::new(),
            capabilities: CapabilityCache::new(),
            sessions: SessionCache::new(),
            observer: BroadcastObserver::new(),
            cancel: None,
        })
    }

    /// Seed the capability cache with addresses known to be reachable.
    pub fn with_reachable<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = CapabilityCache::seeded(addresses);
        self
    }

    pub fn with_observer(mut self, observer: BroadcastObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Checked before every per-address send and raced against every delay.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    // ─── Mutators (between runs) ────────────────────────────────────────────

    pub fn set_recipients(&mut self, recipients: Vec<String>) {
        self.recipients = recipients;
    }

    pub fn set_rate_limit_amount(&mut self, amount: u64) {
        self.config.rate_limit_amount = amount;
    }

    pub fn set_rate_limit_time(&mut self, time: Duration) {
        self.config.rate_limit_time_ms = time.as_millis() as u64;
    }

    pub fn observer_mut(&mut self) -> &mut BroadcastObserver {
        &mut self.observer
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Batches planned by the most recent run.
    pub fn batches(&self) -> &[Vec<String>] {
        &self.batches
    }

    /// Recipients awaiting the retry pass. Empty outside of a run, including
    /// after an aborted one.
    pub fn pending_failures(&self) -> &[String] {
        &self.failures
    }

    pub fn capabilities(&self) -> &CapabilityCache {
        &self.capabilities
    }

    pub fn sessions(&self) -> &SessionCache<T::Session> {
        &self.sessions
    }

    /// Addresses still cached as reachable, for persisting across restarts.
    pub fn reachable_addresses(&self) -> Vec<String> {
        self.capabilities.addresses()
    }

    // ─── Run ────────────────────────────────────────────────────────────────

    /// Send `payloads`, in order, to every recipient. Resolves once the retry
    /// pass has finished. Per-recipient failures never abort the run; a failed
    /// capability check, a failed session listing, an invalid rate limit or
    /// cancellation does.
    pub async fn broadcast(
        &mut self,
        payloads: &[T::Payload],
        options: BroadcastOptions,
    ) -> BroadcastResult<()> {
        let span = tracing::info_span!("broadcast", run_id = %Uuid::new_v4());
        let outcome = self.run(payloads, options).instrument(span).await;
        match outcome {
            Ok(()) => {
                self.observer.broadcast_complete();
                Ok(())
            }
            Err(err) => {
                self.failures.clear();
                warn!(error = %err, "Broadcast aborted");
                self.observer.broadcast_aborted(&err);
                Err(err)
            }
        }
    }

    async fn run(
        &mut self,
        payloads: &[T::Payload],
        options: BroadcastOptions,
    ) -> BroadcastResult<()> {
        self.config.validate()?;

        let open_sessions = self.preflight().await?;
        if !options.skip_initial_delay && self.config.exceeds_global_ceiling(open_sessions) {
            info!(
                open_sessions,
                "Open sessions near the global ceiling, delaying first batch"
            );
            self.pace().await?;
        }

        let sessions = &self.sessions;
        let batches = self.planner.plan(
            &self.recipients,
            payloads.len(),
            |address| sessions.contains(address),
            self.config.rate_limit_amount,
        );
        self.batches = batches;
        self.failures.clear();
        info!(
            recipients = self.recipients.len(),
            batches = self.batches.len(),
            payloads = payloads.len(),
            "Broadcast started"
        );

        let batch_count = self.batches.len();
        for index in 0..batch_count {
            let batch = self.batches[index].clone();
            self.handle_batch(&batch, payloads).await?;
            if index + 1 < batch_count {
                self.pace().await?;
            }
        }

        self.retry_failures(payloads).await?;
        info!("Broadcast complete");
        Ok(())
    }

    /// Record every session already open on the transport. Returns how many
    /// there were.
    async fn preflight(&mut self) -> BroadcastResult<usize> {
        let open = self
            .transport
            .list_sessions()
            .await
            .map_err(BroadcastError::SessionListing)?;
        let count = open.len();
        for session in open {
            self.sessions.insert(session);
        }
        debug!(open_sessions = count, "Preflight session listing complete");
        Ok(count)
    }

    async fn handle_batch(
        &mut self,
        batch: &[String],
        payloads: &[T::Payload],
    ) -> BroadcastResult<()> {
        self.observer.batch_start(batch);
        metrics::histogram!("broadcast.batch_size").record(batch.len() as f64);

        let confirmed = self.capabilities.resolve(&self.transport, batch).await?;
        self.observer.can_message_addresses_update(&confirmed);

        for address in batch {
            self.check_cancelled()?;
            if !self.capabilities.contains(address) {
                debug!(address = %address, "Address cannot be messaged");
                metrics::counter!("broadcast.unreachable").increment(1);
                self.observer.cant_message_address(address);
                continue;
            }

            match self.deliver(address, payloads).await {
                Ok(()) => {
                    // Free memory once the recipient is done.
                    self.capabilities.evict(address);
                    self.sessions.evict(address);
                    metrics::counter!("broadcast.messages_sent").increment(1);
                    self.observer.message_sent(address);
                }
                Err(err) => {
                    warn!(address = %address, error = %err, "Broadcast send failed");
                    metrics::counter!("broadcast.messages_failed").increment(1);
                    self.observer.message_failed(address);
                    if !self.failures.iter().any(|failed| failed == address) {
                        self.failures.push(address.clone());
                    }
                    self.pace().await?;
                }
            }
        }

        self.observer.batch_complete(batch);
        Ok(())
    }

    async fn deliver(&mut self, address: &str, payloads: &[T::Payload]) -> anyhow::Result<()> {
        let session = self.sessions.get_or_create(&self.transport, address).await?;
        for payload in payloads {
            self.observer.message_sending(address);
            session.send(payload).await?;
        }
        Ok(())
    }

    /// One more attempt for every recipient that failed in the batch loop,
    /// each on a fresh session. Recipients that fail again are dropped.
    async fn retry_failures(&mut self, payloads: &[T::Payload]) -> BroadcastResult<()> {
        let failures = std::mem::take(&mut self.failures);
        if failures.is_empty() {
            return Ok(());
        }
        info!(recipients = failures.len(), "Retrying failed recipients");

        for address in &failures {
            self.check_cancelled()?;
            match self.deliver_fresh(address, payloads).await {
                Ok(()) => {
                    metrics::counter!("broadcast.retry_recovered").increment(1);
                    self.observer.message_sent(address);
                }
                Err(err) => {
                    warn!(address = %address, error = %err, "Retry failed, recipient dropped");
                    metrics::counter!("broadcast.permanently_failed").increment(1);
                    self.observer.message_failed(address);
                    self.pace().await?;
                }
            }
        }
        Ok(())
    }

    async fn deliver_fresh(&self, address: &str, payloads: &[T::Payload]) -> anyhow::Result<()> {
        let session = self.transport.create_session(address).await?;
        for payload in payloads {
            session.send(payload).await?;
        }
        Ok(())
    }

    async fn pace(&self) -> BroadcastResult<()> {
        let delay = self.config.rate_limit_time();
        self.observer.delay(delay);
        metrics::counter!("broadcast.delays").increment(1);
        debug!(delay_ms = delay.as_millis() as u64, "Pacing broadcast");

        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(BroadcastError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn check_cancelled(&self) -> BroadcastResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(BroadcastError::Cancelled),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use broadcast_core::event_bus::{capture_sink, CaptureSink};
    use broadcast_core::BroadcastEvent;
    use std::sync::Arc;

    type TestDispatcher = BroadcastDispatcher<MemoryTransport<String>>;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    fn config(rate_limit_amount: u64) -> BroadcastConfig {
        BroadcastConfig {
            rate_limit_amount,
            ..Default::default()
        }
    }

    fn dispatcher(
        transport: MemoryTransport<String>,
        recipients: &[&str],
        rate_limit_amount: u64,
    ) -> (TestDispatcher, Arc<CaptureSink>) {
        let sink = capture_sink();
        let dispatcher =
            BroadcastDispatcher::new(transport, addrs(recipients), config(rate_limit_amount))
                .unwrap()
                .with_observer(BroadcastObserver::from_sink(sink.clone()));
        (dispatcher, sink)
    }

    fn payloads(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("gm #{i}")).collect()
    }

    fn sending_to(sink: &CaptureSink, address: &str) -> usize {
        sink.events()
            .iter()
            .filter(|e| matches!(e, BroadcastEvent::MessageSending { address: a } if a == address))
            .count()
    }

    fn sent_to(sink: &CaptureSink, address: &str) -> usize {
        sink.events()
            .iter()
            .filter(|e| matches!(e, BroadcastEvent::MessageSent { address: a } if a == address))
            .count()
    }

    fn failed_for(sink: &CaptureSink, address: &str) -> usize {
        sink.events()
            .iter()
            .filter(|e| matches!(e, BroadcastEvent::MessageFailed { address: a } if a == address))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_batches_only() {
        let (mut dispatcher, sink) =
            dispatcher(MemoryTransport::new(), &["r1", "r2", "r3", "r4"], 8);

        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        assert_eq!(
            dispatcher.batches(),
            &[addrs(&["r1", "r2"]), addrs(&["r3", "r4"])]
        );
        assert_eq!(
            sink.names(),
            vec![
                "batch_start",
                "capability_updated",
                "message_sending",
                "message_sent",
                "message_sending",
                "message_sent",
                "batch_complete",
                "delay",
                "batch_start",
                "capability_updated",
                "message_sending",
                "message_sent",
                "message_sending",
                "message_sent",
                "batch_complete",
                "broadcast_complete",
            ]
        );
        assert_eq!(dispatcher.transport().deliveries().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_uses_rate_limit_time() {
        let (mut dispatcher, sink) =
            dispatcher(MemoryTransport::new(), &["r1", "r2", "r3"], 4);
        dispatcher.set_rate_limit_time(Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        // Three singleton batches, two gaps between them.
        assert_eq!(sink.count_named("delay"), 2);
        assert!(sink.events().contains(&BroadcastEvent::Delay { ms: 2000 }));
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_address_is_skipped() {
        let transport = MemoryTransport::new().with_unreachable(["r2"]);
        let (mut dispatcher, sink) = dispatcher(transport, &["r1", "r2", "r3"], 1000);

        dispatcher
            .broadcast(&payloads(2), BroadcastOptions::default())
            .await
            .unwrap();

        assert_eq!(sending_to(&sink, "r2"), 0);
        assert_eq!(failed_for(&sink, "r2"), 0);
        assert!(sink.events().contains(&BroadcastEvent::AddressUnreachable {
            address: "r2".into()
        }));
        assert!(sink.events().contains(&BroadcastEvent::CapabilityUpdated {
            addresses: addrs(&["r1", "r3"])
        }));
        assert_eq!(dispatcher.transport().delivered_to("r2"), 0);
        assert_eq!(dispatcher.transport().delivered_to("r3"), 2);
        assert_eq!(sink.count_named("delay"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_recipient_recovered_by_retry() {
        let transport = MemoryTransport::new().with_send_failures("r2", 1);
        let (mut dispatcher, sink) = dispatcher(transport, &["r1", "r2", "r3"], 1000);

        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        assert_eq!(failed_for(&sink, "r2"), 1);
        assert_eq!(sent_to(&sink, "r2"), 1);
        // One delay right after the failure; single batch, so no other.
        assert_eq!(sink.count_named("delay"), 1);
        let names = sink.names();
        let failed_at = names.iter().position(|n| *n == "message_failed").unwrap();
        assert_eq!(names[failed_at + 1], "delay");
        // Retry opens a fresh session instead of reusing the cached one.
        assert_eq!(
            dispatcher.transport().sessions_created(),
            addrs(&["r1", "r2", "r3", "r2"])
        );
        assert_eq!(dispatcher.transport().delivered_to("r2"), 1);
        assert!(dispatcher.pending_failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_twice_failed_recipient_is_dropped() {
        let transport = MemoryTransport::new().with_send_failures("r2", 10);
        let (mut dispatcher, sink) = dispatcher(transport, &["r1", "r2"], 1000);

        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        assert_eq!(failed_for(&sink, "r2"), 2);
        assert_eq!(sent_to(&sink, "r2"), 0);
        // Main-pass failure and retry failure each pace once.
        assert_eq!(sink.count_named("delay"), 2);
        assert_eq!(sink.count_named("broadcast_complete"), 1);
        let r2_sessions = dispatcher
            .transport()
            .sessions_created()
            .iter()
            .filter(|a| *a == "r2")
            .count();
        assert_eq!(r2_sessions, 2);
        assert!(dispatcher.pending_failures().is_empty());
        assert_eq!(sink.names().last(), Some(&"broadcast_complete"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failure_recorded_once() {
        let transport = MemoryTransport::new().with_send_failures("r2", 2);
        let (mut dispatcher, sink) = dispatcher(transport, &["r1", "r2", "r2"], 1000);

        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        assert_eq!(failed_for(&sink, "r2"), 2);
        // A single retry attempt recovers it.
        assert_eq!(sent_to(&sink, "r2"), 1);
        assert_eq!(dispatcher.transport().delivered_to("r2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_failure_counts_as_send_failure() {
        let transport = MemoryTransport::new().with_session_failures("r1", 1);
        let (mut dispatcher, sink) = dispatcher(transport, &["r1"], 1000);

        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        assert_eq!(failed_for(&sink, "r1"), 1);
        assert_eq!(sending_to(&sink, "r1"), 0);
        assert_eq!(sent_to(&sink, "r1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caches_evicted_after_success() {
        let transport = MemoryTransport::new().with_send_failures("r2", 10);
        let (mut dispatcher, _sink) = dispatcher(transport, &["r1", "r2"], 1000);

        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        assert!(!dispatcher.capabilities().contains("r1"));
        assert!(!dispatcher.sessions().contains("r1"));
        // Failed recipients keep their entries.
        assert!(dispatcher.capabilities().contains("r2"));
        assert!(dispatcher.sessions().contains("r2"));
        assert_eq!(dispatcher.reachable_addresses(), addrs(&["r2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_session_lowers_weight() {
        let transport = MemoryTransport::new().with_open_sessions(["r1"]);
        let (mut dispatcher, _sink) = dispatcher(transport, &["r1", "r2", "r3"], 6);

        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        // r1 reuses its session (weight 2) and r2 is fresh (weight 4): 2 + 4 == 6.
        assert_eq!(
            dispatcher.batches(),
            &[addrs(&["r1", "r2"]), addrs(&["r3"])]
        );
        assert_eq!(
            dispatcher.transport().sessions_created(),
            addrs(&["r2", "r3"])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay_under_session_pressure() {
        let transport = MemoryTransport::<String>::new()
            .with_open_sessions(["o1", "o2", "o3", "o4", "o5", "o6"]);
        let sink = capture_sink();
        let config = BroadcastConfig {
            rate_limit_amount: 8,
            global_rate_limit: 10,
            ..Default::default()
        };
        let mut dispatcher = BroadcastDispatcher::new(transport, addrs(&["r1"]), config)
            .unwrap()
            .with_observer(BroadcastObserver::from_sink(sink.clone()));

        // 6 open sessions weigh 3 against a headroom of 2.
        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();
        assert_eq!(sink.names().first(), Some(&"delay"));
        assert_eq!(sink.count_named("delay"), 1);

        sink.clear();
        dispatcher
            .broadcast(
                &payloads(1),
                BroadcastOptions {
                    skip_initial_delay: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(sink.count_named("delay"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capability_failure_aborts_run() {
        let transport = MemoryTransport::new().with_failing_capability_check();
        let (mut dispatcher, sink) = dispatcher(transport, &["r1", "r2"], 1000);

        let err = dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BroadcastError::CapabilityCheck(_)));
        assert_eq!(sink.names(), vec!["batch_start", "broadcast_aborted"]);
        assert!(dispatcher.transport().deliveries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_listing_failure_aborts_run() {
        let transport = MemoryTransport::new().with_failing_session_listing();
        let (mut dispatcher, sink) = dispatcher(transport, &["r1", "r2"], 1000);

        let err = dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BroadcastError::SessionListing(_)));
        assert_eq!(sink.names(), vec!["broadcast_aborted"]);
        assert!(dispatcher.transport().capability_queries().is_empty());
        assert!(dispatcher.transport().deliveries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay() {
        let token = CancellationToken::new();
        let (dispatcher, sink) =
            dispatcher(MemoryTransport::new(), &["r1", "r2", "r3", "r4"], 8);
        let mut dispatcher = dispatcher.with_cancellation(token.clone());
        dispatcher.observer_mut().set_on_delay(move |_| token.cancel());

        let err = dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BroadcastError::Cancelled));
        // Only the delay slot was replaced; the rest still reach the sink.
        assert_eq!(sink.count_named("broadcast_aborted"), 1);
        assert_eq!(dispatcher.transport().deliveries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_discards_pending_failures() {
        let token = CancellationToken::new();
        let transport = MemoryTransport::new().with_send_failures("r1", 1);
        let (dispatcher, sink) = dispatcher(transport, &["r1", "r2"], 1000);
        let mut dispatcher = dispatcher.with_cancellation(token.clone());
        // The failure pace is the first delay of the run.
        dispatcher.observer_mut().set_on_delay(move |_| token.cancel());

        let err = dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BroadcastError::Cancelled));
        assert_eq!(failed_for(&sink, "r1"), 1);
        assert!(dispatcher.pending_failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_send() {
        let token = CancellationToken::new();
        token.cancel();
        let (dispatcher, _sink) = dispatcher(MemoryTransport::new(), &["r1"], 1000);
        let mut dispatcher = dispatcher.with_cancellation(token);

        let err = dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BroadcastError::Cancelled));
        assert!(dispatcher.transport().deliveries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_capabilities_skip_lookup() {
        let (dispatcher, _sink) =
            dispatcher(MemoryTransport::new(), &["r1", "r2", "r3"], 1000);
        let mut dispatcher = dispatcher.with_reachable(["r1"]);

        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        assert_eq!(
            dispatcher.transport().capability_queries(),
            vec![addrs(&["r2", "r3"])]
        );
        assert_eq!(dispatcher.transport().delivered_to("r1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recipients_replaced_between_runs() {
        let (mut dispatcher, sink) = dispatcher(MemoryTransport::new(), &["r1"], 1000);

        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();
        dispatcher.set_recipients(addrs(&["r2", "r3"]));
        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        assert_eq!(dispatcher.batches(), &[addrs(&["r2", "r3"])]);
        assert_eq!(sink.count_named("broadcast_complete"), 2);
        assert_eq!(
            dispatcher.transport().capability_queries(),
            vec![addrs(&["r1"]), addrs(&["r2", "r3"])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_payloads_sent_in_order() {
        let (mut dispatcher, sink) = dispatcher(MemoryTransport::new(), &["r1"], 1000);

        dispatcher
            .broadcast(&payloads(3), BroadcastOptions::default())
            .await
            .unwrap();

        assert_eq!(sending_to(&sink, "r1"), 3);
        let sent: Vec<String> = dispatcher
            .transport()
            .deliveries()
            .into_iter()
            .map(|(_, payload)| payload)
            .collect();
        assert_eq!(sent, payloads(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_recipient_list_completes() {
        let (mut dispatcher, sink) = dispatcher(MemoryTransport::new(), &[], 1000);

        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        assert!(dispatcher.batches().is_empty());
        assert_eq!(sink.names(), vec!["broadcast_complete"]);
        assert!(dispatcher.transport().capability_queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_without_observer() {
        let transport = MemoryTransport::<String>::new().with_send_failures("r1", 1);
        let mut dispatcher =
            BroadcastDispatcher::new(transport, addrs(&["r1", "r2"]), config(1000)).unwrap();

        dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap();

        assert_eq!(dispatcher.transport().delivered_to("r1"), 1);
        assert_eq!(dispatcher.transport().delivered_to("r2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_limit_rejected() {
        let (mut dispatcher, sink) = dispatcher(MemoryTransport::new(), &["r1"], 1000);
        dispatcher.set_rate_limit_amount(0);

        let err = dispatcher
            .broadcast(&payloads(1), BroadcastOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BroadcastError::Config(_)));
        assert_eq!(sink.names(), vec!["broadcast_aborted"]);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result =
            BroadcastDispatcher::new(MemoryTransport::<String>::new(), Vec::new(), config(0));
        assert!(matches!(result, Err(BroadcastError::Config(_))));
    }
}
