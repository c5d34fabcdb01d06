//! Trait interfaces between the wallet and its collaborators.
//!
//! - [`Indexer`]: remote wallet status, relay and history (satchel-rpc implements)
//! - [`FeedTransport`] / [`FeedStream`]: live activity notifications (satchel-rpc implements)
//! - [`KeyValueStore`]: durable string storage (satchel-wallet implements)

use async_trait::async_trait;

use crate::error::{IndexerError, StoreError};
use crate::feed::FeedEvent;
use crate::types::{HistoryEntry, IndexerStatus, SubmitResponse};

/// Remote service that tracks the wallet's outputs and relays transactions.
///
/// `identity` is the account extended public key for HD wallets or the
/// single address for one-key wallets.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Balances, unspent outputs and the next unused receive index.
    async fn status(&self, identity: &str) -> Result<IndexerStatus, IndexerError>;

    /// Relay a serialized transaction. A non-success answer is
    /// [`IndexerError::Rejected`].
    async fn submit(&self, raw_tx_hex: &str) -> Result<SubmitResponse, IndexerError>;

    /// Transactions touching the wallet, newest first.
    async fn history(&self, identity: &str) -> Result<Vec<HistoryEntry>, IndexerError>;
}

/// Opens a live stream of activity on a set of addresses.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&self, addresses: &[String]) -> Result<Box<dyn FeedStream>, IndexerError>;
}

/// An open feed subscription.
#[async_trait]
pub trait FeedStream: Send {
    /// Next event, or `None` once the remote end closed the stream.
    async fn next_event(&mut self) -> Result<Option<FeedEvent>, IndexerError>;
}

/// Flat string key-value storage.
///
/// Batch operations must apply all-or-nothing so a snapshot is never
/// observed half written.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write every entry in one step.
    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError>;

    /// Remove every key in one step. Missing keys are ignored.
    fn remove_many(&self, keys: &[String]) -> Result<(), StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Remove every key starting with `prefix`.
    ///
    /// Default implementation lists then removes in one batch.
    fn remove_prefixed(&self, prefix: &str) -> Result<usize, StoreError> {
        let matching: Vec<String> = self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        let n = matching.len();
        self.remove_many(&matching)?;
        Ok(n)
    }
}
