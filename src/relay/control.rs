//! Relay loop: connect, pump records under credit, delete on settlement,
//! recover on link loss.
//!
//! Everything runs on one task. Each `select!` arm runs to completion before
//! the next event is taken, so the buffer, credit, and tracker need no locks.
//! The only suspended operation is the outstanding store load, polled as one
//! of the arms; its completion is handled like any other event.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use opentelemetry::KeyValue;
use tokio::sync::{Notify, watch};
use tokio::time::Sleep;
use tracing::{Instrument, debug, error, info, warn};

use super::buffer::PrefetchBuffer;
use super::publisher::Publisher;
use super::settlement::{Settlement, SettlementTracker};
use crate::config::RelayConfig;
use crate::error::Result;
use crate::model::{DeliveryTag, Record, RecordId};
use crate::store::OutboxStore;
use crate::telemetry::metrics;
use crate::telemetry::relay::{record_state_transition, start_epoch_span};
use crate::transport::{Endpoint, Link, LinkEvent, Session, Transport};

type LoadFuture = Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send>>;

/// Lifecycle of the relay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Active,
    Disconnected,
    Terminated,
}

impl RelayState {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayState::Connecting => "connecting",
            RelayState::Active => "active",
            RelayState::Disconnected => "disconnected",
            RelayState::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one `run`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub connections: u64,
    pub sent: u64,
    pub settled: u64,
    pub discarded: u64,
    pub loads: u64,
    pub rechecks: u64,
}

/// Cloneable control handle for a running relay.
#[derive(Clone)]
pub struct RelayHandle {
    shutdown: Arc<Notify>,
    state: watch::Receiver<RelayState>,
}

impl RelayHandle {
    /// Ask the relay to close its link, release unsettled records, and stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }
}

/// How an epoch ended.
enum EpochEnd {
    LinkLost,
    Shutdown,
}

struct Recheck {
    /// Send count when the store was found exhausted.
    probe: u64,
    sleep: Pin<Box<Sleep>>,
}

/// Scheduling state that lives for one connection.
#[derive(Default)]
struct Activity {
    /// Outstanding load and the send count it was issued at.
    load: Option<(u64, LoadFuture)>,
    recheck: Option<Recheck>,
    /// Send count at which a load last came back empty. No new load is
    /// issued at that count until the recheck fires.
    exhausted_at: Option<u64>,
    delete_retry: Option<Pin<Box<Sleep>>>,
}

impl Activity {
    async fn load_completion(load: &mut Option<(u64, LoadFuture)>) -> (u64, Result<Vec<Record>>) {
        match load {
            Some((probe, future)) => {
                let probe = *probe;
                (probe, future.await)
            }
            None => std::future::pending().await,
        }
    }

    async fn recheck_due(recheck: &mut Option<Recheck>) -> u64 {
        match recheck {
            Some(recheck) => {
                recheck.sleep.as_mut().await;
                recheck.probe
            }
            None => std::future::pending().await,
        }
    }

    async fn delete_retry_due(retry: &mut Option<Pin<Box<Sleep>>>) {
        match retry {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending().await,
        }
    }
}

/// The relay: owns the prefetch buffer, the publisher, and the settlement
/// tracker, and drives them from store and link events.
pub struct Relay<S, T> {
    store: Arc<S>,
    transport: T,
    config: RelayConfig,
    endpoint: Endpoint,
    shutdown: Arc<Notify>,
    state: watch::Sender<RelayState>,
    epoch: u64,
    buffer: PrefetchBuffer,
    publisher: Publisher,
    tracker: SettlementTracker,
    /// Settled records whose delete failed. Retried on the recheck cadence.
    undeleted: BTreeSet<RecordId>,
    stats: RelayStats,
}

impl<S, T> Relay<S, T>
where
    S: OutboxStore + 'static,
    T: Transport,
{
    pub fn new(store: Arc<S>, transport: T, config: RelayConfig) -> Self {
        let (state, _) = watch::channel(RelayState::Connecting);
        Self {
            store,
            transport,
            endpoint: Endpoint::from(&config),
            buffer: PrefetchBuffer::new(config.buffer_capacity),
            config,
            shutdown: Arc::new(Notify::new()),
            state,
            epoch: 0,
            publisher: Publisher::new(),
            tracker: SettlementTracker::new(),
            undeleted: BTreeSet::new(),
            stats: RelayStats::default(),
        }
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            shutdown: Arc::clone(&self.shutdown),
            state: self.state.subscribe(),
        }
    }

    /// Run until shutdown is requested. Link loss and connection failures
    /// are recovered from; only defects and store reset failures end the
    /// loop with an error.
    pub async fn run(mut self) -> Result<RelayStats> {
        info!(
            endpoint = %self.endpoint,
            buffer_capacity = self.buffer.capacity(),
            "relay started"
        );

        loop {
            self.set_state(RelayState::Connecting);
            let connected = tokio::select! {
                _ = self.shutdown.notified() => break,
                result = self.transport.connect(&self.endpoint) => result,
            };

            let session = match connected {
                Ok(session) => {
                    metrics::connections().add(1, &[KeyValue::new("result", "ok")]);
                    session
                }
                Err(e) => {
                    metrics::connections().add(1, &[KeyValue::new("result", "error")]);
                    warn!(
                        endpoint = %self.endpoint,
                        retry_in = ?self.config.reconnect_delay,
                        "connect failed: {e}"
                    );
                    tokio::select! {
                        _ = self.shutdown.notified() => break,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => continue,
                    }
                }
            };

            self.epoch += 1;
            self.stats.connections += 1;
            let span = start_epoch_span(&self.endpoint, self.epoch);
            record_state_transition(&span, "connecting", "active");
            self.set_state(RelayState::Active);

            let end = self.serve(session).instrument(span.clone()).await;

            record_state_transition(&span, "active", "disconnected");
            self.set_state(RelayState::Disconnected);
            self.recover().instrument(span).await?;

            match end? {
                EpochEnd::Shutdown => break,
                EpochEnd::LinkLost => {}
            }
        }

        self.set_state(RelayState::Terminated);
        if !self.undeleted.is_empty() {
            warn!(
                undeleted = self.undeleted.len(),
                "settled records left in the store, they will be delivered again"
            );
        }
        info!(
            connections = self.stats.connections,
            sent = self.stats.sent,
            settled = self.stats.settled,
            discarded = self.stats.discarded,
            "relay stopped"
        );
        Ok(self.stats)
    }

    /// One connection epoch.
    async fn serve(&mut self, session: Session<T::Link>) -> Result<EpochEnd> {
        let Session {
            mut link,
            mut events,
        } = session;
        let mut activity = Activity::default();
        if !self.undeleted.is_empty() {
            self.schedule_delete_retry(&mut activity);
        }
        self.request_load(&mut activity);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("shutdown requested, closing link");
                    link.close();
                    return Ok(EpochEnd::Shutdown);
                }
                event = events.recv() => match event {
                    Some(LinkEvent::Credit(amount)) => {
                        self.publisher.on_credit(amount);
                        debug!(amount, credit = self.publisher.credit(), "credit granted");
                        if !self.pump(&mut link, &mut activity)? {
                            return Ok(EpochEnd::LinkLost);
                        }
                    }
                    Some(LinkEvent::Settled(tag)) => self.settle(tag, &mut activity).await,
                    Some(LinkEvent::Disconnected) | None => {
                        info!("link lost");
                        return Ok(EpochEnd::LinkLost);
                    }
                },
                (probe, result) = Activity::load_completion(&mut activity.load), if activity.load.is_some() => {
                    activity.load = None;
                    if !self.on_loaded(probe, result, &mut link, &mut activity)? {
                        return Ok(EpochEnd::LinkLost);
                    }
                }
                probe = Activity::recheck_due(&mut activity.recheck), if activity.recheck.is_some() => {
                    activity.recheck = None;
                    self.on_recheck(probe, &mut activity);
                }
                _ = Activity::delete_retry_due(&mut activity.delete_retry), if activity.delete_retry.is_some() => {
                    activity.delete_retry = None;
                    self.retry_deletes(&mut activity).await;
                }
            }
        }
    }

    /// Drain the buffer under credit, then top it up. Returns false when a
    /// send reported the link gone.
    fn pump(&mut self, link: &mut T::Link, activity: &mut Activity) -> Result<bool> {
        match self
            .publisher
            .drain(&mut self.buffer, link, &mut self.tracker)
        {
            Ok(0) => {}
            Ok(sent) => {
                let sent = sent as u64;
                self.stats.sent += sent;
                metrics::records_sent().add(sent, &[self.address_label()]);
            }
            Err(e) if e.is_link_loss() => {
                warn!("send failed: {e}");
                return Ok(false);
            }
            Err(e) => {
                error!("send rejected: {e}");
                return Err(e);
            }
        }

        if !self.buffer.is_full()
            && activity.load.is_none()
            && activity.exhausted_at != Some(self.publisher.sent())
        {
            self.request_load(activity);
        }
        Ok(true)
    }

    fn request_load(&mut self, activity: &mut Activity) {
        let max = self.buffer.vacancy();
        let probe = self.publisher.sent();
        let store = Arc::clone(&self.store);

        activity.recheck = None;
        activity.load = Some((probe, Box::pin(async move { store.load(max).await })));
        self.stats.loads += 1;
        debug!(max, probe, "requested records");
    }

    fn on_loaded(
        &mut self,
        probe: u64,
        result: Result<Vec<Record>>,
        link: &mut T::Link,
        activity: &mut Activity,
    ) -> Result<bool> {
        let records = result.unwrap_or_else(|e| {
            warn!(probe, "store load failed, treating as empty: {e}");
            Vec::new()
        });

        let loaded = records.len();
        for record in records {
            if let Err(record) = self.buffer.try_push(record) {
                warn!(
                    record_id = %record.id,
                    "store returned more records than requested; record left for the next epoch"
                );
            }
        }

        if loaded == 0 {
            activity.exhausted_at = Some(probe);
            if self.buffer.is_empty() && probe == self.publisher.sent() {
                info!(
                    delay = ?self.config.recheck_delay,
                    "exhausted available records, waiting to recheck"
                );
                activity.recheck = Some(Recheck {
                    probe,
                    sleep: Box::pin(tokio::time::sleep(self.config.recheck_delay)),
                });
                return Ok(true);
            }
        } else {
            activity.exhausted_at = None;
            debug!(loaded, buffered = self.buffer.len(), "records loaded");
        }

        self.pump(link, activity)
    }

    fn on_recheck(&mut self, probe: u64, activity: &mut Activity) {
        if probe != self.publisher.sent() || !self.buffer.is_empty() || activity.load.is_some() {
            debug!(probe, "stale recheck ignored");
            return;
        }
        info!("rechecking for records");
        self.stats.rechecks += 1;
        metrics::rechecks().add(1, &[]);
        activity.exhausted_at = None;
        self.request_load(activity);
    }

    async fn settle(&mut self, tag: DeliveryTag, activity: &mut Activity) {
        match self.tracker.on_settled(tag, self.store.as_ref()).await {
            Settlement::Deleted(id) => {
                self.undeleted.remove(&id);
                self.count_settled();
                debug!(record_id = %id, %tag, "settled record");
            }
            Settlement::DeleteFailed(id, e) => {
                error!(record_id = %id, %tag, "failed to delete settled record: {e}");
                self.undeleted.insert(id);
                if activity.delete_retry.is_none() {
                    self.schedule_delete_retry(activity);
                }
            }
            Settlement::Ignored => {}
        }
    }

    fn schedule_delete_retry(&self, activity: &mut Activity) {
        activity.delete_retry = Some(Box::pin(tokio::time::sleep(self.config.recheck_delay)));
    }

    async fn retry_deletes(&mut self, activity: &mut Activity) {
        let ids: Vec<RecordId> = self.undeleted.iter().copied().collect();
        for id in ids {
            match self.store.delete(id).await {
                Ok(()) => {
                    self.undeleted.remove(&id);
                    self.count_settled();
                    info!(record_id = %id, "deleted settled record on retry");
                }
                Err(e) => warn!(record_id = %id, "delete retry failed: {e}"),
            }
        }
        if !self.undeleted.is_empty() {
            self.schedule_delete_retry(activity);
        }
    }

    fn count_settled(&mut self) {
        self.stats.settled += 1;
        metrics::records_settled().add(1, &[self.address_label()]);
    }

    /// Close out an epoch: unsettled deliveries and buffered records are
    /// forgotten and the store cursor is reset, so the next connection reads
    /// them again.
    async fn recover(&mut self) -> Result<()> {
        let dropped = self.buffer.clear();
        self.publisher.reset_credit();
        let discarded = self.tracker.on_disconnected(self.store.as_ref()).await?;

        self.stats.discarded += discarded as u64;
        if discarded > 0 {
            metrics::deliveries_discarded().add(discarded as u64, &[self.address_label()]);
        }
        info!(discarded, dropped, "epoch closed, unsettled records released");
        Ok(())
    }

    fn set_state(&self, state: RelayState) {
        self.state.send_replace(state);
    }

    fn address_label(&self) -> KeyValue {
        KeyValue::new("address", self.endpoint.address.clone())
    }
}
