//! Live activity monitoring.
//!
//! The monitor is one tokio task reading a [`FeedStream`]. Each event is
//! handled to completion before the next is read:
//!
//! 1. transaction messages apply the watched in/out deltas to the stored
//!    balances, wait the settle delay, resync once, then fire the callback
//!    once per direction
//! 2. block messages and poll ticks resync only
//!
//! When a resync moves the receive cursor and an [`AddressResolver`] is set,
//! the feed is reconnected with the new addresses added to the watched set.
//!
//! Closing is checked between events, so an in-flight reconciliation always
//! finishes. Writes after logout are dropped by the state layer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use satchel_core::constants::DEFAULT_SETTLE_DELAY_MS;
use satchel_core::feed::{FeedEvent, FeedTransaction, MessageKind, WatchedFlow};
use satchel_core::error::IndexerError;
use satchel_core::traits::{FeedStream, FeedTransport, Indexer};

use crate::state::WalletState;
use crate::sync;

/// Monitor lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorStatus {
    Disconnected,
    Connected,
    Reconciling,
    /// Terminal.
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Delivered to the activity callback after reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityEvent {
    pub direction: Direction,
    pub txid: String,
    /// Watched value moved in this direction.
    pub satoshis: u64,
}

pub type ActivityCallback = Arc<dyn Fn(&ActivityEvent) + Send + Sync>;

/// Addresses to watch at a receive cursor, `None` if they cannot be derived.
pub type AddressResolver = Arc<dyn Fn(u32) -> Option<Vec<String>> + Send + Sync>;

/// Apply one transaction's watched flow to the stored balances.
///
/// Outgoing value is taken from the total and leaves nothing confirmed;
/// incoming value is added to the unconfirmed balance.
pub fn apply_flow(confirmed: &mut i64, unconfirmed: &mut i64, flow: WatchedFlow) {
    if flow.outgoing > 0 {
        *unconfirmed = *confirmed + *unconfirmed - flow.outgoing as i64;
        *confirmed = 0;
    }
    if flow.incoming > 0 {
        *unconfirmed += flow.incoming as i64;
    }
}

/// Feed consumer bound to one wallet's state.
pub struct ActivityMonitor {
    transport: Arc<dyn FeedTransport>,
    indexer: Arc<dyn Indexer>,
    state: WalletState,
    settle_delay: Duration,
    resolver: Option<AddressResolver>,
}

impl ActivityMonitor {
    pub fn new(transport: Arc<dyn FeedTransport>, indexer: Arc<dyn Indexer>, state: WalletState) -> Self {
        Self {
            transport,
            indexer,
            state,
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            resolver: None,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Follow the receive cursor, resolving it to addresses with `resolver`.
    pub fn with_resolver(mut self, resolver: AddressResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Subscribe to `watched` and spawn the monitor task.
    pub fn start(self, watched: Vec<String>, on_event: ActivityCallback) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (recheck_tx, recheck_rx) = watch::channel(());
        let (status_tx, status_rx) = watch::channel(MonitorStatus::Disconnected);
        let task = tokio::spawn(self.run(watched, on_event, shutdown_rx, recheck_rx, status_tx));
        MonitorHandle { shutdown: shutdown_tx, recheck: recheck_tx, status: status_rx, task }
    }

    async fn run(
        self,
        mut watched: Vec<String>,
        on_event: ActivityCallback,
        mut shutdown: watch::Receiver<bool>,
        mut recheck: watch::Receiver<()>,
        status: watch::Sender<MonitorStatus>,
    ) {
        let identity = match self.state.identity() {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                debug!("monitor not started: logged out");
                status.send_replace(MonitorStatus::Closed);
                return;
            }
            Err(e) => {
                warn!(error = %e, "monitor could not read state");
                status.send_replace(MonitorStatus::Closed);
                return;
            }
        };

        let mut stream = match self.transport.connect(&watched).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "feed connect failed");
                status.send_replace(MonitorStatus::Closed);
                return;
            }
        };
        info!(addresses = watched.len(), "activity monitor connected");
        status.send_replace(MonitorStatus::Connected);

        let mut cursor = self.cursor();
        let mut watched_set: HashSet<String> = watched.iter().cloned().collect();
        loop {
            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                changed = recheck.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    None
                }
                next = stream.next_event() => Some(next),
            };
            if let Some(next) = next {
                match next {
                    Ok(Some(event)) => {
                        status.send_replace(MonitorStatus::Reconciling);
                        self.handle(event, &identity, &watched_set, &on_event).await;
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("feed ended");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "feed failed");
                        break;
                    }
                }
            }
            match self.resubscribe(&mut cursor, &mut watched).await {
                Ok(Some(next)) => {
                    stream = next;
                    watched_set = watched.iter().cloned().collect();
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "feed resubscribe failed");
                    break;
                }
            }
            status.send_replace(MonitorStatus::Connected);
        }
        status.send_replace(MonitorStatus::Closed);
        debug!("activity monitor closed");
    }

    async fn handle(&self, event: FeedEvent, identity: &str, watched: &HashSet<String>, on_event: &ActivityCallback) {
        match event {
            FeedEvent::Tick => self.resync().await,
            FeedEvent::Message(msg) => match msg.kind() {
                MessageKind::Transaction => {
                    for tx in &msg.data {
                        self.reconcile(tx, identity, watched, on_event).await;
                    }
                }
                MessageKind::Block => self.resync().await,
                MessageKind::Open | MessageKind::Other => debug!(kind = %msg.kind, "feed message ignored"),
            },
        }
    }

    async fn reconcile(
        &self,
        tx: &FeedTransaction,
        identity: &str,
        watched: &HashSet<String>,
        on_event: &ActivityCallback,
    ) {
        let flow = tx.watched_flow(watched);
        if flow.is_empty() {
            return;
        }
        debug!(txid = tx.txid(), outgoing = flow.outgoing, incoming = flow.incoming, "reconciling");

        let applied = self.state.update_logged_in(identity, |snap| {
            apply_flow(&mut snap.confirmed_balance, &mut snap.unconfirmed_balance, flow);
            snap.last_sync_ms = None;
        });
        match applied {
            Ok(true) => {}
            Ok(false) => {
                debug!("logged out, delta dropped");
                return;
            }
            Err(e) => {
                warn!(error = %e, "could not persist delta");
                return;
            }
        }

        tokio::time::sleep(self.settle_delay).await;
        self.resync().await;

        for (direction, satoshis) in [(Direction::Outgoing, flow.outgoing), (Direction::Incoming, flow.incoming)] {
            if satoshis > 0 {
                on_event(&ActivityEvent { direction, txid: tx.txid().to_string(), satoshis });
            }
        }
    }

    async fn resync(&self) {
        if let Err(e) = sync::resync(self.indexer.as_ref(), &self.state).await {
            warn!(error = %e, "resync after feed event failed");
        }
    }

    fn cursor(&self) -> Option<u32> {
        self.state.load().ok().map(|snap| snap.next_index)
    }

    /// Reconnect with the cursor's addresses added once the cursor moved.
    async fn resubscribe(
        &self,
        cursor: &mut Option<u32>,
        watched: &mut Vec<String>,
    ) -> Result<Option<Box<dyn FeedStream>>, IndexerError> {
        let Some(resolve) = &self.resolver else {
            return Ok(None);
        };
        let next = self.cursor();
        if next.is_none() || next == *cursor {
            return Ok(None);
        }
        *cursor = next;
        let Some(addresses) = next.and_then(|n| resolve(n)) else {
            return Ok(None);
        };
        let fresh: Vec<String> = addresses.into_iter().filter(|a| !watched.contains(a)).collect();
        if fresh.is_empty() {
            return Ok(None);
        }

        let mut extended = watched.clone();
        extended.extend(fresh);
        let stream = self.transport.connect(&extended).await?;
        info!(cursor = ?next, addresses = extended.len(), "feed resubscribed");
        *watched = extended;
        Ok(Some(stream))
    }
}

/// Control handle for a running monitor. Dropping it closes the monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    recheck: watch::Sender<()>,
    status: watch::Receiver<MonitorStatus>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn status(&self) -> MonitorStatus {
        *self.status.borrow()
    }

    /// Stop dispatching. Returns at once; an in-flight event still finishes.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Ask the monitor to compare the stored cursor with its subscription.
    pub fn recheck_cursor(&self) {
        let _ = self.recheck.send(());
    }

    /// Close and wait for the task to finish.
    pub async fn shutdown(mut self) {
        self.close();
        let _ = self.status.wait_for(|s| *s == MonitorStatus::Closed).await;
    }

    /// Wait until the monitor reaches `Closed` on its own.
    pub async fn closed(&mut self) {
        let _ = self.status.wait_for(|s| *s == MonitorStatus::Closed).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
