//! Wallet composition: session, sync, spending and live activity.
//!
//! The [`Wallet`] struct ties together the key ring, the persisted state,
//! the indexer and the optional feed transport. All balances and outputs
//! are served from the persisted snapshot; the indexer is contacted only
//! when the snapshot is stale or a refresh is forced.

use std::sync::Arc;

use bitcoin::Address;
use tracing::{info, warn};
use zeroize::Zeroizing;

use satchel_core::constants::DUST_LIMIT;
use satchel_core::payload::OpReturnPayload;
use satchel_core::traits::{FeedTransport, Indexer, KeyValueStore};
use satchel_core::types::{Balance, DerivedKeyRef, HistoryEntry, IndexerStatus, Utxo};

use crate::broadcast::{BroadcastOptions, BroadcastOutcome, Broadcaster};
use crate::builder::{SignedTransaction, TransactionBuilder};
use crate::coin_selection::UtxoSelector;
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::hooks::{HookRegistry, WalletHook};
use crate::keys::{DerivedKey, KeyRing};
use crate::mnemonic::{generate_mnemonic, looks_like_mnemonic, normalize};
use crate::monitor::{
    ActivityCallback, ActivityEvent, ActivityMonitor, AddressResolver, MonitorHandle, MonitorStatus,
};
use crate::state::{WalletSnapshot, WalletState};
use crate::sync;

/// A single wallet session over durable storage.
pub struct Wallet {
    config: WalletConfig,
    keys: Option<KeyRing>,
    state: WalletState,
    indexer: Arc<dyn Indexer>,
    broadcaster: Broadcaster,
    feed: Option<Arc<dyn FeedTransport>>,
    hooks: HookRegistry,
    monitor: Option<MonitorHandle>,
}

impl Wallet {
    /// Create a wallet over `store`, resuming a stored session if present.
    pub fn open(
        config: WalletConfig,
        store: Arc<dyn KeyValueStore>,
        indexer: Arc<dyn Indexer>,
    ) -> Result<Self, WalletError> {
        let state = WalletState::new(store);
        let snapshot = state.load()?;
        let keys = match &snapshot.xpriv {
            Some(secret) => {
                let mut keys = KeyRing::from_secret(secret, config.network)?;
                keys.index_to(snapshot.next_index)?;
                info!(identity = %keys.identity(), "resumed session");
                Some(keys)
            }
            None => None,
        };
        Ok(Self {
            config,
            keys,
            state,
            broadcaster: Broadcaster::new(indexer.clone()),
            indexer,
            feed: None,
            hooks: HookRegistry::new(),
            monitor: None,
        })
    }

    /// Attach the transport used by [`start_activity_monitor`](Self::start_activity_monitor).
    pub fn with_feed(mut self, transport: Arc<dyn FeedTransport>) -> Self {
        self.feed = Some(transport);
        self
    }

    pub fn register_hook(&mut self, hook: Arc<dyn WalletHook>) {
        self.hooks.register(hook);
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn state(&self) -> &WalletState {
        &self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.keys.is_some()
    }

    fn keys(&self) -> Result<&KeyRing, WalletError> {
        self.keys.as_ref().ok_or(WalletError::NotLoggedIn)
    }

    // --- session ---

    /// Log in with a 12-word mnemonic, an extended private key or a WIF key.
    ///
    /// Persists the secrets, then syncs. If the first sync fails the session
    /// is rolled back and the error returned. Returns the receive address.
    pub async fn login(&mut self, secret: &str) -> Result<Address, WalletError> {
        if self.keys.is_some() {
            return Err(WalletError::AlreadyLoggedIn);
        }
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(WalletError::InvalidKey("secret required".into()));
        }

        let keys = KeyRing::from_secret(secret, self.config.network)?;
        let mnemonic = looks_like_mnemonic(secret).then(|| Zeroizing::new(normalize(secret)));
        let primary = keys.derive(DerivedKeyRef::receive(0))?;
        self.state.persist(&WalletSnapshot {
            mnemonic,
            xpriv: Some(keys.root_secret()),
            xpub: keys.xpub().map(|x| x.to_string()),
            address: Some(primary.address.to_string()),
            ..Default::default()
        })?;
        let identity = keys.identity();
        self.keys = Some(keys);

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "initial sync failed, rolling back login");
            self.keys = None;
            self.state.clear()?;
            return Err(e);
        }
        self.hooks.login(&identity);
        info!(%identity, "logged in");
        self.address()
    }

    /// Close the monitor and remove every stored `satchel` key.
    pub async fn logout(&mut self) -> Result<(), WalletError> {
        if let Some(monitor) = self.monitor.take() {
            monitor.close();
        }
        self.state.clear()?;
        self.keys = None;
        self.hooks.logout();
        info!("logged out");
        Ok(())
    }

    /// Generate a fresh mnemonic and log in with it. Returns the phrase.
    pub async fn new_wallet(&mut self) -> Result<Zeroizing<String>, WalletError> {
        if self.keys.is_some() {
            return Err(WalletError::AlreadyLoggedIn);
        }
        let phrase = generate_mnemonic()?;
        self.login(&phrase).await?;
        Ok(phrase)
    }

    // --- keys & addresses ---

    /// Key at `key_ref`; fails with `NotInitialized` without a root key.
    pub fn lookup_key(&self, key_ref: DerivedKeyRef) -> Result<DerivedKey, WalletError> {
        self.keys.as_ref().ok_or(WalletError::NotInitialized)?.derive(key_ref)
    }

    /// Receive address at the current derivation cursor.
    pub fn address(&self) -> Result<Address, WalletError> {
        let cursor = self.state.load()?.next_index;
        Ok(self.keys()?.derive(DerivedKeyRef::receive(cursor))?.address)
    }

    /// Change address at the current derivation cursor.
    pub fn change_address(&self) -> Result<Address, WalletError> {
        let cursor = self.state.load()?.next_index;
        Ok(self.keys()?.derive(DerivedKeyRef::change(cursor))?.address)
    }

    pub fn mnemonic(&self) -> Result<Option<Zeroizing<String>>, WalletError> {
        Ok(self.state.load()?.mnemonic)
    }

    // --- cached state ---

    pub fn balance(&self) -> Result<Balance, WalletError> {
        Ok(self.state.load()?.balance())
    }

    /// The `max` highest-value spendable outputs; 0 returns all.
    pub fn utxos(&self, max: usize) -> Result<Vec<Utxo>, WalletError> {
        Ok(UtxoSelector::select(&self.state.load()?.utxos, max))
    }

    // --- sync ---

    /// Sync unless the last sync is younger than the debounce interval.
    /// Returns whether the indexer was contacted.
    pub async fn update_all(&mut self) -> Result<bool, WalletError> {
        self.keys()?;
        if !self.state.is_stale(self.config.update_debounce())? {
            return Ok(false);
        }
        self.refresh().await?;
        Ok(true)
    }

    /// Sync now, regardless of staleness.
    pub async fn refresh(&mut self) -> Result<IndexerStatus, WalletError> {
        self.keys()?;
        let status = sync::resync(self.indexer.as_ref(), &self.state)
            .await?
            .ok_or(WalletError::NotLoggedIn)?;

        let cursor = status.derivation_cursor();
        let keys = self.keys.as_mut().ok_or(WalletError::NotLoggedIn)?;
        keys.index_to(cursor)?;
        let address = keys.derive(DerivedKeyRef::receive(cursor))?.address.to_string();
        let identity = keys.identity();
        self.state.update_logged_in(&identity, |snap| snap.address = Some(address))?;
        if let Some(monitor) = &self.monitor {
            monitor.recheck_cursor();
        }
        self.hooks.sync(&status);
        Ok(status)
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>, WalletError> {
        let identity = self.keys()?.identity();
        Ok(self.indexer.history(&identity).await?)
    }

    // --- spending ---

    /// Build and sign a transaction carrying `payload`, optionally paying
    /// `amount` to `destination`. Nothing is sent.
    pub fn build_data_transaction(
        &self,
        payload: OpReturnPayload,
        destination: Option<&str>,
        amount: u64,
    ) -> Result<SignedTransaction, WalletError> {
        let mut builder = self.builder()?;
        builder.set_data(payload);
        if let Some(destination) = destination {
            builder.pay_to(destination, amount, self.config.network)?;
        }
        self.sign_with(&builder)
    }

    /// Build and sign a plain payment. Nothing is sent.
    pub fn build_payment(&self, destination: &str, amount: u64) -> Result<SignedTransaction, WalletError> {
        self.keys()?;
        if amount < DUST_LIMIT {
            return Err(WalletError::InvalidAmount(format!("{amount} sat is below the dust limit")));
        }
        let mut builder = self.builder()?;
        builder.pay_to(destination, amount, self.config.network)?;
        self.sign_with(&builder)
    }

    /// Pay `amount` satoshis to `destination` and relay.
    pub async fn send(&mut self, destination: &str, amount: u64) -> Result<BroadcastOutcome, WalletError> {
        let tx = self.build_payment(destination, amount)?;
        self.broadcast(tx, BroadcastOptions::default()).await
    }

    /// [`build_data_transaction`](Self::build_data_transaction), then relay.
    pub async fn send_data(
        &mut self,
        payload: OpReturnPayload,
        destination: Option<&str>,
        amount: u64,
    ) -> Result<BroadcastOutcome, WalletError> {
        let tx = self.build_data_transaction(payload, destination, amount)?;
        self.broadcast(tx, BroadcastOptions::default()).await
    }

    /// Serialize and relay `tx`. A relayed transaction's inputs move to the
    /// pending-spent set and the next refresh goes remote.
    pub async fn broadcast(
        &mut self,
        tx: SignedTransaction,
        options: BroadcastOptions,
    ) -> Result<BroadcastOutcome, WalletError> {
        self.hooks.before_broadcast(&tx)?;
        let spent = tx.spent_outpoints();
        let outcome = self.broadcaster.broadcast(tx, options).await?;
        if outcome.is_relayed() {
            self.state.update(|snap| {
                snap.mark_spent(&spent);
                snap.last_sync_ms = None;
            })?;
        }
        self.hooks.after_broadcast(&outcome);
        Ok(outcome)
    }

    fn builder(&self) -> Result<TransactionBuilder, WalletError> {
        self.keys()?;
        let mut builder = TransactionBuilder::new();
        builder
            .set_fee_per_kb(self.config.fee_per_kb)
            .set_data_marker(self.config.data_marker);
        Ok(builder)
    }

    fn sign_with(&self, builder: &TransactionBuilder) -> Result<SignedTransaction, WalletError> {
        let keys = self.keys()?;
        let snapshot = self.state.load()?;
        let utxos = UtxoSelector::select(&snapshot.utxos, self.config.max_utxos);
        builder.build_signed(&utxos, keys, DerivedKeyRef::change(snapshot.next_index))
    }

    // --- activity ---

    /// Watch the current receive and change addresses, adding the next pair
    /// whenever a sync moves the cursor. Replaces a running monitor. Must be
    /// called inside a tokio runtime.
    pub fn start_activity_monitor<F>(&mut self, on_event: F) -> Result<(), WalletError>
    where
        F: Fn(&ActivityEvent) + Send + Sync + 'static,
    {
        let feed = self
            .feed
            .clone()
            .ok_or_else(|| WalletError::ConfigurationError("no feed transport configured".into()))?;
        let watched = vec![self.address()?.to_string(), self.change_address()?.to_string()];
        self.stop_activity_monitor();

        let hooks = self.hooks.clone();
        let callback: ActivityCallback = Arc::new(move |event: &ActivityEvent| {
            hooks.activity(event);
            on_event(event);
        });
        let keys = self.keys()?.clone();
        let resolver: AddressResolver = Arc::new(move |cursor| {
            let receive = keys.derive(DerivedKeyRef::receive(cursor)).ok()?;
            let change = keys.derive(DerivedKeyRef::change(cursor)).ok()?;
            Some(vec![receive.address.to_string(), change.address.to_string()])
        });
        let monitor = ActivityMonitor::new(feed, self.indexer.clone(), self.state.clone())
            .with_settle_delay(self.config.settle_delay())
            .with_resolver(resolver);
        self.monitor = Some(monitor.start(watched, callback));
        Ok(())
    }

    pub fn stop_activity_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.close();
        }
    }

    pub fn monitor_status(&self) -> Option<MonitorStatus> {
        self.monitor.as_ref().map(MonitorHandle::status)
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("network", &self.config.network)
            .field("logged_in", &self.is_logged_in())
            .field("monitor", &self.monitor_status())
            .finish()
    }
}
