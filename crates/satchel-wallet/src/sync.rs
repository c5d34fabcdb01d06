//! Reconciliation of local state with the indexer.

use std::collections::HashSet;
use std::time::Duration;

use bitcoin::OutPoint;
use tracing::{debug, info};

use satchel_core::traits::Indexer;
use satchel_core::types::IndexerStatus;

use crate::error::WalletError;
use crate::state::{WalletSnapshot, WalletState};

/// Overwrite balances, outputs and cursor in `snapshot` with `status`.
///
/// Pending-spent outputs stay out of the spendable set while the indexer
/// still reports them and are forgotten once it stops.
pub fn apply_status(snapshot: &mut WalletSnapshot, status: &IndexerStatus, now_ms: i64) {
    let reported: HashSet<OutPoint> = status.utxos.iter().map(|u| u.outpoint()).collect();
    snapshot.pending_spent.retain(|o| reported.contains(o));
    let pending: HashSet<OutPoint> = snapshot.pending_spent.iter().copied().collect();

    snapshot.utxos = status
        .utxos
        .iter()
        .filter(|u| !pending.contains(&u.outpoint()))
        .cloned()
        .collect();
    snapshot.confirmed_balance = status.confirmed;
    snapshot.unconfirmed_balance = status.unconfirmed;
    snapshot.next_index = status.derivation_cursor();
    snapshot.last_sync_ms = Some(now_ms);
}

/// Fetch status for the stored identity and apply it.
///
/// Returns `None` when logged out, or when the identity changed while the
/// request was in flight (the result is then discarded).
pub async fn resync(indexer: &dyn Indexer, state: &WalletState) -> Result<Option<IndexerStatus>, WalletError> {
    let Some(identity) = state.identity()? else {
        debug!("resync skipped: logged out");
        return Ok(None);
    };
    let status = indexer.status(&identity).await?;
    let now = chrono::Utc::now().timestamp_millis();
    if !state.update_logged_in(&identity, |snap| apply_status(snap, &status, now))? {
        debug!("identity changed during resync, result discarded");
        return Ok(None);
    }
    info!(
        confirmed = status.confirmed,
        unconfirmed = status.unconfirmed,
        utxos = status.utxos.len(),
        "wallet synced"
    );
    Ok(Some(status))
}

/// Resync only if the last sync is older than `debounce`. Returns whether
/// the indexer was contacted.
pub async fn resync_if_stale(
    indexer: &dyn Indexer,
    state: &WalletState,
    debounce: Duration,
) -> Result<bool, WalletError> {
    if !state.is_stale(debounce)? {
        debug!("state fresh, serving cached");
        return Ok(false);
    }
    Ok(resync(indexer, state).await?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use bitcoin::Txid;
    use parking_lot::Mutex;
    use satchel_core::error::IndexerError;
    use satchel_core::types::{HistoryEntry, SubmitResponse, Utxo};
    use std::str::FromStr;
    use std::sync::Arc;
    use zeroize::Zeroizing;

    const XPUB: &str = "xpub-test";

    struct FixedIndexer {
        status: IndexerStatus,
        calls: Mutex<Vec<String>>,
        /// Cleared into the state mid-request to simulate a concurrent logout.
        logout_during: Option<WalletState>,
    }

    #[async_trait]
    impl Indexer for FixedIndexer {
        async fn status(&self, identity: &str) -> Result<IndexerStatus, IndexerError> {
            self.calls.lock().push(identity.to_string());
            if let Some(state) = &self.logout_during {
                state.clear().unwrap();
            }
            Ok(self.status.clone())
        }
        async fn submit(&self, _: &str) -> Result<SubmitResponse, IndexerError> {
            Err(IndexerError::Transport("unused".into()))
        }
        async fn history(&self, _: &str) -> Result<Vec<HistoryEntry>, IndexerError> {
            Ok(vec![])
        }
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

    fn status() -> IndexerStatus {
        IndexerStatus {
            confirmed: 3000,
            unconfirmed: 500,
            utxos: vec![utxo(0, 1000), utxo(1, 2000), utxo(2, 500)],
            next_index: Some(6),
        }
    }

    fn logged_in_state() -> WalletState {
        let state = WalletState::new(Arc::new(MemoryStore::new()));
        state
            .persist(&WalletSnapshot {
                xpriv: Some(Zeroizing::new("xprv".into())),
                xpub: Some(XPUB.into()),
                ..Default::default()
            })
            .unwrap();
        state
    }

    fn indexer(logout_during: Option<WalletState>) -> FixedIndexer {
        FixedIndexer { status: status(), calls: Mutex::new(vec![]), logout_during }
    }

    #[test]
    fn apply_overwrites_everything() {
        let mut snap = WalletSnapshot { confirmed_balance: 99, utxos: vec![utxo(9, 9)], ..Default::default() };
        apply_status(&mut snap, &status(), 42);
        assert_eq!(snap.confirmed_balance, 3000);
        assert_eq!(snap.unconfirmed_balance, 500);
        assert_eq!(snap.utxos.len(), 3);
        assert_eq!(snap.next_index, 6);
        assert_eq!(snap.last_sync_ms, Some(42));
    }

    #[test]
    fn pending_spent_filtered_until_indexer_drops_it() {
        let mut snap = WalletSnapshot {
            pending_spent: vec![utxo(1, 2000).outpoint(), utxo(5, 1).outpoint()],
            ..Default::default()
        };
        apply_status(&mut snap, &status(), 1);
        assert_eq!(snap.utxos, vec![utxo(0, 1000), utxo(2, 500)]);
        assert_eq!(snap.pending_spent, vec![utxo(1, 2000).outpoint()]);

        let later = IndexerStatus { utxos: vec![utxo(0, 1000)], ..status() };
        apply_status(&mut snap, &later, 2);
        assert!(snap.pending_spent.is_empty());
    }

    #[tokio::test]
    async fn resync_uses_stored_identity() {
        let state = logged_in_state();
        let idx = indexer(None);
        let got = resync(&idx, &state).await.unwrap();
        assert_eq!(got, Some(status()));
        assert_eq!(*idx.calls.lock(), vec![XPUB.to_string()]);
        let snap = state.load().unwrap();
        assert_eq!(snap.confirmed_balance, 3000);
        assert!(snap.last_sync_ms.is_some());
    }

    #[tokio::test]
    async fn resync_logged_out_is_noop() {
        let state = WalletState::new(Arc::new(MemoryStore::new()));
        let idx = indexer(None);
        assert_eq!(resync(&idx, &state).await.unwrap(), None);
        assert!(idx.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn logout_during_resync_discards_result() {
        let state = logged_in_state();
        let idx = indexer(Some(state.clone()));
        assert_eq!(resync(&idx, &state).await.unwrap(), None);
        assert_eq!(state.load().unwrap(), WalletSnapshot::default());
    }

    #[tokio::test]
    async fn fresh_state_skips_remote() {
        let state = logged_in_state();
        let idx = indexer(None);
        assert!(resync_if_stale(&idx, &state, Duration::from_secs(10)).await.unwrap());
        assert!(!resync_if_stale(&idx, &state, Duration::from_secs(10)).await.unwrap());
        assert_eq!(idx.calls.lock().len(), 1);

        state.invalidate().unwrap();
        assert!(resync_if_stale(&idx, &state, Duration::from_secs(10)).await.unwrap());
        assert_eq!(idx.calls.lock().len(), 2);
    }
}
