//! Persisted wallet state.
//!
//! The state is one [`WalletSnapshot`] stored as flat string values under
//! the `satchel.` key prefix. Every mutation replaces the whole snapshot in
//! one storage batch while holding the state lock, so readers never observe
//! a half-applied update.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::OutPoint;
use parking_lot::Mutex;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use satchel_core::constants::{STORAGE_PREFIX, keys};
use satchel_core::traits::KeyValueStore;
use satchel_core::types::{Balance, Utxo};

use crate::error::WalletError;

/// Everything the wallet remembers between sessions.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WalletSnapshot {
    pub mnemonic: Option<Zeroizing<String>>,
    /// Extended private key, or the WIF of a single-key wallet.
    pub xpriv: Option<Zeroizing<String>>,
    pub xpub: Option<String>,
    /// Primary receive address.
    pub address: Option<String>,
    pub confirmed_balance: i64,
    pub unconfirmed_balance: i64,
    /// Spendable outputs as last reported, minus `pending_spent`.
    pub utxos: Vec<Utxo>,
    /// Outputs consumed by a locally relayed transaction that the indexer
    /// may still report as unspent.
    pub pending_spent: Vec<OutPoint>,
    /// Next unused receive index.
    pub next_index: u32,
    /// Unix milliseconds of the last completed sync.
    pub last_sync_ms: Option<i64>,
}

impl WalletSnapshot {
    /// What the indexer tracks the wallet by: the xpub, else the address.
    pub fn identity(&self) -> Option<&str> {
        self.xpub.as_deref().or(self.address.as_deref())
    }

    pub fn is_logged_in(&self) -> bool {
        self.xpriv.is_some()
    }

    pub fn balance(&self) -> Balance {
        Balance { confirmed: self.confirmed_balance, unconfirmed: self.unconfirmed_balance }
    }

    /// Move the given outputs from the spendable set to `pending_spent`.
    pub fn mark_spent(&mut self, outpoints: &[OutPoint]) {
        let spent: HashSet<&OutPoint> = outpoints.iter().collect();
        self.utxos.retain(|u| !spent.contains(&u.outpoint()));
        for o in outpoints {
            if !self.pending_spent.contains(o) {
                self.pending_spent.push(*o);
            }
        }
    }
}

impl fmt::Debug for WalletSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSnapshot")
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "<redacted>"))
            .field("xpriv", &self.xpriv.as_ref().map(|_| "<redacted>"))
            .field("xpub", &self.xpub)
            .field("address", &self.address)
            .field("confirmed_balance", &self.confirmed_balance)
            .field("unconfirmed_balance", &self.unconfirmed_balance)
            .field("utxos", &self.utxos.len())
            .field("pending_spent", &self.pending_spent.len())
            .field("next_index", &self.next_index)
            .field("last_sync_ms", &self.last_sync_ms)
            .finish()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_or_zero<T: FromStr + Default>(value: Option<String>) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or_default()
}

/// Shared handle to the persisted snapshot.
#[derive(Clone)]
pub struct WalletState {
    store: Arc<dyn KeyValueStore>,
    lock: Arc<Mutex<()>>,
}

impl WalletState {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store, lock: Arc::new(Mutex::new(())) }
    }

    fn read(&self) -> Result<WalletSnapshot, WalletError> {
        let get = |k: &str| self.store.get(k);

        let utxos = match non_empty(get(keys::UTXO)?) {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(error = %e, "discarding unreadable utxo set");
                Vec::new()
            }),
            None => Vec::new(),
        };
        let pending_spent = match non_empty(get(keys::SPENT)?) {
            Some(json) => serde_json::from_str::<Vec<String>>(&json)
                .unwrap_or_default()
                .iter()
                .filter_map(|s| OutPoint::from_str(s).ok())
                .collect(),
            None => Vec::new(),
        };

        Ok(WalletSnapshot {
            mnemonic: non_empty(get(keys::MNEMONIC)?).map(Zeroizing::new),
            xpriv: non_empty(get(keys::XPRIV)?).map(Zeroizing::new),
            xpub: non_empty(get(keys::XPUB)?),
            address: non_empty(get(keys::ADDRESS)?),
            confirmed_balance: parse_or_zero(get(keys::CONFIRMED_BALANCE)?),
            unconfirmed_balance: parse_or_zero(get(keys::UNCONFIRMED_BALANCE)?),
            utxos,
            pending_spent,
            next_index: parse_or_zero(get(keys::NUM)?),
            last_sync_ms: non_empty(get(keys::TIMESTAMP)?).and_then(|v| v.parse().ok()),
        })
    }

    fn write(&self, snapshot: &WalletSnapshot) -> Result<(), WalletError> {
        let secret = |s: &Option<Zeroizing<String>>| s.as_ref().map(|z| z.as_str().to_owned()).unwrap_or_default();
        let utxos = serde_json::to_string(&snapshot.utxos).map_err(|e| WalletError::Serialization(e.to_string()))?;
        let spent: Vec<String> = snapshot.pending_spent.iter().map(|o| o.to_string()).collect();
        let spent = serde_json::to_string(&spent).map_err(|e| WalletError::Serialization(e.to_string()))?;

        let entries = [
            (keys::MNEMONIC, secret(&snapshot.mnemonic)),
            (keys::XPRIV, secret(&snapshot.xpriv)),
            (keys::XPUB, snapshot.xpub.clone().unwrap_or_default()),
            (keys::ADDRESS, snapshot.address.clone().unwrap_or_default()),
            (keys::CONFIRMED_BALANCE, snapshot.confirmed_balance.to_string()),
            (keys::UNCONFIRMED_BALANCE, snapshot.unconfirmed_balance.to_string()),
            (keys::UTXO, utxos),
            (keys::SPENT, spent),
            (keys::NUM, snapshot.next_index.to_string()),
            (keys::TIMESTAMP, snapshot.last_sync_ms.map(|t| t.to_string()).unwrap_or_default()),
        ];
        self.store.set_many(&entries)?;
        Ok(())
    }

    /// Read the current snapshot. Missing or malformed numbers read as zero.
    pub fn load(&self) -> Result<WalletSnapshot, WalletError> {
        let _guard = self.lock.lock();
        self.read()
    }

    /// Replace the stored snapshot.
    pub fn persist(&self, snapshot: &WalletSnapshot) -> Result<(), WalletError> {
        let _guard = self.lock.lock();
        self.write(snapshot)
    }

    /// Remove every `satchel`-prefixed key in one storage call.
    pub fn clear(&self) -> Result<usize, WalletError> {
        let _guard = self.lock.lock();
        let removed = self.store.remove_prefixed(STORAGE_PREFIX)?;
        debug!(removed, "cleared wallet state");
        Ok(removed)
    }

    /// Read-modify-write under the state lock.
    pub fn update<F>(&self, f: F) -> Result<WalletSnapshot, WalletError>
    where
        F: FnOnce(&mut WalletSnapshot),
    {
        let _guard = self.lock.lock();
        let mut snapshot = self.read()?;
        f(&mut snapshot);
        self.write(&snapshot)?;
        Ok(snapshot)
    }

    /// Like [`update`](Self::update), but only while `identity` is still the
    /// logged-in wallet. Returns whether the update was applied.
    pub fn update_logged_in<F>(&self, identity: &str, f: F) -> Result<bool, WalletError>
    where
        F: FnOnce(&mut WalletSnapshot),
    {
        let _guard = self.lock.lock();
        let mut snapshot = self.read()?;
        if !snapshot.is_logged_in() || snapshot.identity() != Some(identity) {
            return Ok(false);
        }
        f(&mut snapshot);
        self.write(&snapshot)?;
        Ok(true)
    }

    /// The stored identity, if logged in.
    pub fn identity(&self) -> Result<Option<String>, WalletError> {
        let snapshot = self.load()?;
        if !snapshot.is_logged_in() {
            return Ok(None);
        }
        Ok(snapshot.identity().map(str::to_string))
    }

    /// Forget the last sync time so the next refresh goes remote.
    pub fn invalidate(&self) -> Result<(), WalletError> {
        self.update(|s| s.last_sync_ms = None).map(|_| ())
    }

    pub fn mark_synced(&self) -> Result<(), WalletError> {
        let now = now_ms();
        self.update(|s| s.last_sync_ms = Some(now)).map(|_| ())
    }

    /// True without a prior sync, or when the last one is older than `debounce`.
    pub fn is_stale(&self, debounce: Duration) -> Result<bool, WalletError> {
        self.is_stale_at(debounce.as_millis() as i64, now_ms())
    }

    pub fn is_stale_at(&self, debounce_ms: i64, now_ms: i64) -> Result<bool, WalletError> {
        Ok(match self.load()?.last_sync_ms {
            None => true,
            Some(last) => now_ms - last > debounce_ms,
        })
    }
}

impl fmt::Debug for WalletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletState").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use bitcoin::Txid;

    const XPUB: &str = "xpub661MyMwAqRbcFkPHucMnrGNzDwb6teAX1RbKQmqtEF8kK3Z7LZ59qafCjB9eCRLiTVG3uxBxgKvRgbubRhqSKXnGGb1aoaqLrpMBDrVxga8";

    fn state() -> (Arc<MemoryStore>, WalletState) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), WalletState::new(store))
    }

    fn utxo(vout: u32, satoshis: u64) -> Utxo {
        Utxo {
            txid: Txid::from_str("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b").unwrap(),
            vout,
            satoshis,
            script: None,
            chain: Some(0),
            num: Some(vout),
            address: None,
        }
    }

    fn logged_in() -> WalletSnapshot {
        WalletSnapshot {
            xpriv: Some(Zeroizing::new("xprv-secret".into())),
            xpub: Some(XPUB.into()),
            address: Some("1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA".into()),
            ..Default::default()
        }
    }

    #[test]
    fn empty_store_loads_default() {
        let (_, s) = state();
        assert_eq!(s.load().unwrap(), WalletSnapshot::default());
    }

    #[test]
    fn persist_then_load() {
        let (_, s) = state();
        let snap = WalletSnapshot {
            mnemonic: Some(Zeroizing::new("words".into())),
            confirmed_balance: 1500,
            unconfirmed_balance: -200,
            utxos: vec![utxo(0, 1000), utxo(1, 500)],
            pending_spent: vec![utxo(7, 1).outpoint()],
            next_index: 4,
            last_sync_ms: Some(1_700_000_000_000),
            ..logged_in()
        };
        s.persist(&snap).unwrap();
        assert_eq!(s.load().unwrap(), snap);
    }

    #[test]
    fn numbers_default_to_zero() {
        let (store, s) = state();
        store
            .set_many(&[(keys::CONFIRMED_BALANCE, "garbage".into()), (keys::NUM, "".into())])
            .unwrap();
        let snap = s.load().unwrap();
        assert_eq!(snap.confirmed_balance, 0);
        assert_eq!(snap.next_index, 0);
    }

    #[test]
    fn clear_removes_only_prefixed_keys() {
        let (store, s) = state();
        s.persist(&logged_in()).unwrap();
        store.set_many(&[("unrelated", "keep".into())]).unwrap();
        assert_eq!(s.clear().unwrap(), keys::ALL.len());
        assert_eq!(store.keys().unwrap(), vec!["unrelated".to_string()]);
        assert_eq!(s.load().unwrap(), WalletSnapshot::default());
    }

    #[test]
    fn stale_without_timestamp() {
        let (_, s) = state();
        assert!(s.is_stale(Duration::from_millis(10_000)).unwrap());
    }

    #[test]
    fn fresh_after_sync_and_stale_after_clear() {
        let (_, s) = state();
        s.persist(&WalletSnapshot { last_sync_ms: Some(now_ms()), ..logged_in() }).unwrap();
        assert!(!s.is_stale(Duration::from_millis(10_000)).unwrap());
        s.clear().unwrap();
        assert!(s.is_stale(Duration::from_millis(10_000)).unwrap());
    }

    #[test]
    fn staleness_boundary() {
        let (_, s) = state();
        s.persist(&WalletSnapshot { last_sync_ms: Some(1_000), ..Default::default() }).unwrap();
        assert!(!s.is_stale_at(10_000, 11_000).unwrap());
        assert!(s.is_stale_at(10_000, 11_001).unwrap());
    }

    #[test]
    fn invalidate_drops_timestamp_only() {
        let (_, s) = state();
        s.persist(&WalletSnapshot { last_sync_ms: Some(5), confirmed_balance: 9, ..logged_in() }).unwrap();
        s.invalidate().unwrap();
        let snap = s.load().unwrap();
        assert_eq!(snap.last_sync_ms, None);
        assert_eq!(snap.confirmed_balance, 9);
    }

    #[test]
    fn mark_synced_sets_timestamp() {
        let (_, s) = state();
        s.mark_synced().unwrap();
        assert!(s.load().unwrap().last_sync_ms.is_some());
    }

    #[test]
    fn update_logged_in_requires_matching_identity() {
        let (_, s) = state();
        assert!(!s.update_logged_in(XPUB, |snap| snap.confirmed_balance = 1).unwrap());
        assert_eq!(s.load().unwrap().confirmed_balance, 0);

        s.persist(&logged_in()).unwrap();
        assert!(!s.update_logged_in("xpub-other", |snap| snap.confirmed_balance = 1).unwrap());
        assert!(s.update_logged_in(XPUB, |snap| snap.confirmed_balance = 2).unwrap());
        assert_eq!(s.load().unwrap().confirmed_balance, 2);
    }

    #[test]
    fn identity_falls_back_to_address() {
        let (_, s) = state();
        assert_eq!(s.identity().unwrap(), None);
        s.persist(&WalletSnapshot { xpub: None, ..logged_in() }).unwrap();
        assert_eq!(s.identity().unwrap().as_deref(), Some("1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA"));
    }

    #[test]
    fn mark_spent_moves_outputs() {
        let mut snap = WalletSnapshot { utxos: vec![utxo(0, 10), utxo(1, 20)], ..Default::default() };
        snap.mark_spent(&[utxo(0, 10).outpoint()]);
        snap.mark_spent(&[utxo(0, 10).outpoint()]);
        assert_eq!(snap.utxos, vec![utxo(1, 20)]);
        assert_eq!(snap.pending_spent, vec![utxo(0, 10).outpoint()]);
    }

    #[test]
    fn debug_redacts_secrets() {
        let snap = WalletSnapshot { mnemonic: Some(Zeroizing::new("secret words".into())), ..logged_in() };
        let dbg = format!("{snap:?}");
        assert!(!dbg.contains("secret words"));
        assert!(!dbg.contains("xprv-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn handles_share_one_store() {
        let (_, s) = state();
        let other = s.clone();
        s.update(|snap| snap.next_index = 3).unwrap();
        assert_eq!(other.load().unwrap().next_index, 3);
    }
}
