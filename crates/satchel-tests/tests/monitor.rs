//! Activity monitor driven through the wallet: subscription, per-direction
//! callbacks, resyncs and shutdown paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use satchel_core::types::{Balance, Utxo};
use satchel_tests::helpers::*;
use satchel_wallet::{ActivityEvent, Direction, MonitorStatus, Wallet, WalletError, WalletHook};
use tokio::sync::mpsc;

struct Harness {
    wallet: Wallet,
    indexer: Arc<MockIndexer>,
    feed: Arc<MockFeed>,
    handle: FeedHandle,
    events: mpsc::UnboundedReceiver<ActivityEvent>,
    address: String,
    change: String,
}

impl Harness {
    /// Logged-in wallet with an empty balance and a running monitor.
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(setup: impl FnOnce(&mut Wallet)) -> Self {
        let indexer = MockIndexer::new(status(vec![], 0));
        let (handle, feed) = mock_feed();
        let mut wallet = wallet(indexer.clone()).with_feed(feed.clone());
        wallet.login(ABANDON).await.unwrap();
        setup(&mut wallet);

        let (tx, events) = mpsc::unbounded_channel();
        wallet
            .start_activity_monitor(move |event| {
                let _ = tx.send(event.clone());
            })
            .unwrap();
        let address = wallet.address().unwrap().to_string();
        let change = wallet.change_address().unwrap().to_string();
        let h = Self { wallet, indexer, feed, handle, events, address, change };
        h.connected().await;
        h
    }

    async fn connected(&self) {
        eventually("monitor connected", || self.wallet.monitor_status() == Some(MonitorStatus::Connected)).await;
    }

    async fn next_event(&mut self) -> ActivityEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for activity")
            .expect("callback dropped")
    }
}

fn funded(txid_byte: u8, satoshis: u64, chain: u32, num: u32, next_index: u32) -> satchel_core::types::IndexerStatus {
    let u: Utxo = utxo(txid_byte, 0, satoshis, chain, num);
    status(vec![u], next_index)
}

#[tokio::test]
async fn subscribes_to_receive_and_change_addresses() {
    let h = Harness::start().await;
    assert_eq!(h.feed.subscriptions(), vec![vec![h.address.clone(), h.change.clone()]]);
}

#[tokio::test]
async fn incoming_payment_fires_after_resync() {
    let mut h = Harness::start().await;
    let calls_before = h.indexer.status_calls().len();

    h.indexer.set_status(funded(7, 5_000, 0, 0, 1));
    let txid = txid(7).to_string();
    h.handle.transaction(&txid, &[("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", 6_000)], &[(h.address.as_str(), 5_000)]);

    let event = h.next_event().await;
    assert_eq!(event, ActivityEvent { direction: Direction::Incoming, txid, satoshis: 5_000 });
    assert_eq!(h.indexer.status_calls().len(), calls_before + 1);

    // The callback runs after the resync, so state already reflects the indexer.
    assert_eq!(h.wallet.balance().unwrap().confirmed, 5_000);
    assert_eq!(h.wallet.utxos(0).unwrap().len(), 1);
}

#[tokio::test]
async fn advanced_cursor_extends_the_subscription() {
    let mut h = Harness::start().await;
    h.indexer.set_status(funded(7, 5_000, 0, 0, 1));
    h.handle.transaction(&txid(7).to_string(), &[], &[(h.address.as_str(), 5_000)]);
    h.next_event().await;

    let feed = h.feed.clone();
    eventually("resubscribed", || feed.subscriptions().len() == 2).await;
    let next_address = h.wallet.address().unwrap().to_string();
    let next_change = h.wallet.change_address().unwrap().to_string();
    assert_ne!(next_address, h.address);
    assert_eq!(
        h.feed.subscriptions()[1],
        vec![h.address.clone(), h.change.clone(), next_address.clone(), next_change]
    );

    // Payments to the new address are seen.
    h.handle.transaction(&"ab".repeat(32), &[], &[(next_address.as_str(), 1_200)]);
    let event = h.next_event().await;
    assert_eq!((event.direction, event.satoshis), (Direction::Incoming, 1_200));
}

#[tokio::test]
async fn refresh_that_moves_the_cursor_resubscribes() {
    let mut h = Harness::start().await;
    h.indexer.set_status(status(vec![], 3));
    h.wallet.refresh().await.unwrap();

    let feed = h.feed.clone();
    eventually("resubscribed", || feed.subscriptions().len() == 2).await;
    let latest = h.feed.subscriptions()[1].clone();
    assert_eq!(latest.len(), 4);
    assert_eq!(latest[2], h.wallet.address().unwrap().to_string());
    h.connected().await;
}

#[tokio::test]
async fn refresh_without_cursor_change_keeps_the_subscription() {
    let mut h = Harness::start().await;
    h.wallet.refresh().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.feed.subscriptions().len(), 1);
}

#[tokio::test]
async fn spend_with_change_reports_both_directions() {
    let mut h = Harness::start().await;
    let (address, change) = (h.address.clone(), h.change.clone());
    h.handle.transaction(
        "aa".repeat(32).as_str(),
        &[(address.as_str(), 10_000)],
        &[(DEST, 5_000), (change.as_str(), 4_700)],
    );

    let first = h.next_event().await;
    let second = h.next_event().await;
    assert_eq!((first.direction, first.satoshis), (Direction::Outgoing, 10_000));
    assert_eq!((second.direction, second.satoshis), (Direction::Incoming, 4_700));
    assert_eq!(first.txid, second.txid);
}

#[tokio::test]
async fn unrelated_transactions_are_ignored_and_blocks_resync() {
    let mut h = Harness::start().await;
    let calls_before = h.indexer.status_calls().len();

    h.handle.transaction(&"bb".repeat(32), &[("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", 9_000)], &[(DEST, 8_000)]);
    h.handle.block();

    let indexer = h.indexer.clone();
    eventually("block resync", || indexer.status_calls().len() == calls_before + 1).await;
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn failed_resync_still_delivers_the_event() {
    let mut h = Harness::start().await;
    h.indexer.set_offline();
    h.handle.transaction(&"cc".repeat(32), &[], &[(h.address.as_str(), 2_000)]);

    let event = h.next_event().await;
    assert_eq!(event.satoshis, 2_000);
    // Only the optimistic delta landed.
    assert_eq!(h.wallet.balance().unwrap().unconfirmed, 2_000);
}

#[tokio::test]
async fn feed_end_closes_the_monitor() {
    let h = Harness::start().await;
    let Harness { wallet, handle, .. } = h;
    drop(handle);
    eventually("closed", || wallet.monitor_status() == Some(MonitorStatus::Closed)).await;
}

#[tokio::test]
async fn feed_error_closes_the_monitor() {
    let h = Harness::start().await;
    h.handle.fail("stream reset");
    eventually("closed", || h.wallet.monitor_status() == Some(MonitorStatus::Closed)).await;
}

#[tokio::test]
async fn stopping_detaches_the_monitor() {
    let mut h = Harness::start().await;
    h.wallet.stop_activity_monitor();
    assert_eq!(h.wallet.monitor_status(), None);

    h.handle.transaction(&"dd".repeat(32), &[], &[(h.address.as_str(), 1_000)]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn logout_stops_monitoring_and_clears_state() {
    let mut h = Harness::start().await;
    h.wallet.logout().await.unwrap();
    assert_eq!(h.wallet.monitor_status(), None);
    assert_eq!(h.wallet.balance().unwrap(), Balance::default());

    h.handle.transaction(&"ee".repeat(32), &[], &[(h.address.as_str(), 1_000)]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.events.try_recv().is_err());
    assert!(!h.wallet.state().load().unwrap().is_logged_in());
}

#[tokio::test]
async fn monitor_requires_login() {
    let indexer = MockIndexer::new(status(vec![], 0));
    let (_handle, feed) = mock_feed();
    let mut w = wallet(indexer).with_feed(feed);
    assert_eq!(w.start_activity_monitor(|_| {}).unwrap_err(), WalletError::NotLoggedIn);
}

#[derive(Default)]
struct Counter(AtomicUsize);

impl WalletHook for Counter {
    fn on_activity(&self, _event: &ActivityEvent) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn hooks_observe_activity() {
    let counter = Arc::new(Counter::default());
    let hook = counter.clone();
    let mut h = Harness::start_with(move |w| w.register_hook(hook)).await;

    h.handle.transaction(&"ff".repeat(32), &[], &[(h.address.as_str(), 3_000)]);
    h.next_event().await;
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
}
