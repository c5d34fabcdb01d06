//! UTXO selection.
//!
//! Transactions spend the few largest outputs: sorting by value descending
//! and keeping the top `max` bounds the input count (and so the fee) while
//! consolidating dust-sized outputs only when nothing larger is left.

use satchel_core::types::Utxo;

/// Largest-first UTXO selector.
pub struct UtxoSelector;

impl UtxoSelector {
    /// The `max` highest-value outputs, largest first.
    ///
    /// The sort is stable, so equal values keep their input order.
    /// `max == 0` means no limit and returns the set unchanged.
    pub fn select(utxos: &[Utxo], max: usize) -> Vec<Utxo> {
        if max == 0 {
            return utxos.to_vec();
        }
        let mut sorted = utxos.to_vec();
        sorted.sort_by(|a, b| b.satoshis.cmp(&a.satoshis));
        sorted.truncate(max);
        sorted
    }

    /// Sum of output values.
    pub fn total_value(utxos: &[Utxo]) -> u64 {
        utxos.iter().map(|u| u.satoshis).sum()
    }
}
