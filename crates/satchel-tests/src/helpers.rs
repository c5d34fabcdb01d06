//! Shared mocks and fixtures for integration tests.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Transaction, Txid};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use satchel_core::error::IndexerError;
use satchel_core::feed::{FeedEvent, FeedMessage};
use satchel_core::traits::{FeedStream, FeedTransport, Indexer};
use satchel_core::types::{HistoryEntry, IndexerStatus, SubmitResponse, Utxo};
use satchel_wallet::{MemoryStore, Wallet, WalletConfig};

/// BIP-39 test vector phrase.
pub const ABANDON: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// A valid mainnet P2PKH destination outside the wallet.
pub const DEST: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

/// Deterministic txid whose bytes are all `n`.
pub fn txid(n: u8) -> Txid {
    Txid::from_str(&format!("{n:02x}").repeat(32)).unwrap()
}

/// An output owned by key `m/chain/num`.
pub fn utxo(n: u8, vout: u32, satoshis: u64, chain: u32, num: u32) -> Utxo {
    Utxo {
        txid: txid(n),
        vout,
        satoshis,
        script: None,
        chain: Some(chain),
        num: Some(num),
        address: None,
    }
}

pub fn status(utxos: Vec<Utxo>, next_index: u32) -> IndexerStatus {
    let confirmed = utxos.iter().map(|u| u.satoshis as i64).sum();
    IndexerStatus { confirmed, unconfirmed: 0, utxos, next_index: Some(next_index) }
}

pub fn decode(raw_hex: &str) -> Transaction {
    bitcoin::consensus::encode::deserialize_hex(raw_hex).unwrap()
}

// ---------------------------------------------------------------------------
// Indexer
// ---------------------------------------------------------------------------

/// Indexer double. Records every call; status and relay answers are
/// switchable mid-test.
#[derive(Default)]
pub struct MockIndexer {
    status: Mutex<Option<IndexerStatus>>,
    reject: Mutex<Option<(u16, String)>>,
    history: Mutex<Vec<HistoryEntry>>,
    status_calls: Mutex<Vec<String>>,
    history_calls: Mutex<Vec<String>>,
    submitted: Mutex<Vec<String>>,
}

impl MockIndexer {
    pub fn new(status: IndexerStatus) -> Arc<Self> {
        let mock = Self::default();
        *mock.status.lock() = Some(status);
        Arc::new(mock)
    }

    /// Every status call fails with a transport error.
    pub fn offline() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, status: IndexerStatus) {
        *self.status.lock() = Some(status);
    }

    pub fn set_offline(&self) {
        *self.status.lock() = None;
    }

    pub fn reject_submits(&self, status: u16, body: &str) {
        *self.reject.lock() = Some((status, body.to_string()));
    }

    pub fn set_history(&self, entries: Vec<HistoryEntry>) {
        *self.history.lock() = entries;
    }

    pub fn status_calls(&self) -> Vec<String> {
        self.status_calls.lock().clone()
    }

    pub fn history_calls(&self) -> Vec<String> {
        self.history_calls.lock().clone()
    }

    pub fn submitted(&self) -> Vec<Transaction> {
        self.submitted.lock().iter().map(|h| decode(h)).collect()
    }
}

#[async_trait]
impl Indexer for MockIndexer {
    async fn status(&self, identity: &str) -> Result<IndexerStatus, IndexerError> {
        self.status_calls.lock().push(identity.to_string());
        self.status
            .lock()
            .clone()
            .ok_or_else(|| IndexerError::Transport("connection refused".into()))
    }

    async fn submit(&self, raw_tx_hex: &str) -> Result<SubmitResponse, IndexerError> {
        if let Some((status, body)) = self.reject.lock().clone() {
            return Err(IndexerError::Rejected { status, body });
        }
        self.submitted.lock().push(raw_tx_hex.to_string());
        let txid = decode(raw_tx_hex).compute_txid().to_string();
        Ok(SubmitResponse { txid: Some(txid.clone()), body: json!({ "txid": txid }) })
    }

    async fn history(&self, identity: &str) -> Result<Vec<HistoryEntry>, IndexerError> {
        self.history_calls.lock().push(identity.to_string());
        Ok(self.history.lock().clone())
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

type EventResult = Result<FeedEvent, IndexerError>;

/// Feed double. Every `connect` reads the same event channel, so a
/// resubscribed stream picks up where the previous one stopped.
pub struct MockFeed {
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<EventResult>>>,
    subscriptions: Mutex<Vec<Vec<String>>>,
}

impl MockFeed {
    /// Address lists passed to `connect`, in call order.
    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.subscriptions.lock().clone()
    }
}

struct MockStream(Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<EventResult>>>);

#[async_trait]
impl FeedStream for MockStream {
    async fn next_event(&mut self) -> Result<Option<FeedEvent>, IndexerError> {
        self.0.lock().await.recv().await.transpose()
    }
}

#[async_trait]
impl FeedTransport for MockFeed {
    async fn connect(&self, addresses: &[String]) -> Result<Box<dyn FeedStream>, IndexerError> {
        self.subscriptions.lock().push(addresses.to_vec());
        Ok(Box::new(MockStream(self.receiver.clone())))
    }
}

/// Test side of a [`MockFeed`]. Dropping it ends the stream.
pub struct FeedHandle(mpsc::UnboundedSender<EventResult>);

impl FeedHandle {
    pub fn push(&self, event: FeedEvent) {
        let _ = self.0.send(Ok(event));
    }

    /// A mempool transaction moving `(address, satoshis)` pairs.
    pub fn transaction(&self, txid: &str, inputs: &[(&str, u64)], outputs: &[(&str, u64)]) {
        self.push(tx_event(txid, inputs, outputs));
    }

    pub fn block(&self) {
        self.push(FeedEvent::Message(FeedMessage { kind: "block".into(), data: vec![] }));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.0.send(Err(IndexerError::Transport(reason.to_string())));
    }
}

pub fn mock_feed() -> (FeedHandle, Arc<MockFeed>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let feed = MockFeed {
        receiver: Arc::new(tokio::sync::Mutex::new(rx)),
        subscriptions: Mutex::new(Vec::new()),
    };
    (FeedHandle(tx), Arc::new(feed))
}

pub fn tx_event(txid: &str, inputs: &[(&str, u64)], outputs: &[(&str, u64)]) -> FeedEvent {
    let ios = |pairs: &[(&str, u64)]| -> Vec<serde_json::Value> {
        pairs.iter().map(|(a, v)| json!({ "e": { "a": a, "v": v } })).collect()
    };
    let message = json!({
        "type": "t",
        "data": [{ "tx": { "h": txid }, "in": ios(inputs), "out": ios(outputs) }]
    });
    FeedEvent::Message(serde_json::from_value(message).unwrap())
}

// ---------------------------------------------------------------------------
// Wallets
// ---------------------------------------------------------------------------

/// Default settings without the post-event settle delay.
pub fn test_config() -> WalletConfig {
    WalletConfig { settle_delay_ms: 0, ..WalletConfig::default() }
}

pub fn wallet(indexer: Arc<MockIndexer>) -> Wallet {
    Wallet::open(test_config(), Arc::new(MemoryStore::new()), indexer).unwrap()
}

/// A wallet logged in with [`ABANDON`].
pub async fn logged_in(indexer: Arc<MockIndexer>) -> Wallet {
    let mut w = wallet(indexer);
    w.login(ABANDON).await.unwrap();
    w
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
