//! Serialization and relay of signed transactions.
//!
//! Serialization happens before anything is sent. In safe mode the
//! transaction must pass structural, dust, fee and signature checks first;
//! in testing mode it is returned without contacting the relay.

use std::sync::Arc;

use bitcoin::Txid;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::secp256k1::Secp256k1;
use tracing::{debug, info};

use satchel_core::constants::{DUST_LIMIT, FEE_SECURITY_MARGIN};
use satchel_core::crypto::verify_input;
use satchel_core::traits::Indexer;
use satchel_core::types::SubmitResponse;

use crate::builder::{SignedTransaction, estimate_fee, estimate_size};
use crate::error::WalletError;

/// How a transaction is serialized and whether it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOptions {
    /// Validate before serializing.
    pub safe: bool,
    /// Serialize only; never contact the relay.
    pub testing: bool,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self { safe: true, testing: false }
    }
}

impl BroadcastOptions {
    pub fn dry_run() -> Self {
        Self { safe: true, testing: true }
    }
}

/// Result of a broadcast call.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastOutcome {
    /// Testing mode: serialized but not sent.
    DryRun { tx: SignedTransaction, raw_hex: String },
    /// Accepted by the relay.
    Relayed { txid: Txid, raw_hex: String, response: SubmitResponse },
}

impl BroadcastOutcome {
    pub fn txid(&self) -> Txid {
        match self {
            BroadcastOutcome::DryRun { tx, .. } => tx.txid(),
            BroadcastOutcome::Relayed { txid, .. } => *txid,
        }
    }

    pub fn raw_hex(&self) -> &str {
        match self {
            BroadcastOutcome::DryRun { raw_hex, .. } | BroadcastOutcome::Relayed { raw_hex, .. } => raw_hex,
        }
    }

    pub fn is_relayed(&self) -> bool {
        matches!(self, BroadcastOutcome::Relayed { .. })
    }
}

/// Reject a transaction the relay should never see.
///
/// Checks, in order:
/// 1. at least one input and one output, one prevout per input
/// 2. outputs do not exceed inputs
/// 3. no non-zero output below the dust limit
/// 4. the fee is within `FEE_SECURITY_MARGIN` of the estimate either way,
///    plus up to a dust limit of dropped change on the high side
/// 5. every input signature verifies against its prevout
pub fn check_transaction(signed: &SignedTransaction) -> Result<(), WalletError> {
    let tx = signed.transaction();
    let prevouts = signed.prevouts();
    let invalid = |msg: String| Err(WalletError::InvalidTransaction(msg));

    if tx.input.is_empty() {
        return invalid("no inputs".into());
    }
    if tx.output.is_empty() {
        return invalid("no outputs".into());
    }
    if prevouts.len() != tx.input.len() {
        return invalid(format!("{} inputs but {} prevouts", tx.input.len(), prevouts.len()));
    }

    let total_in: u64 = prevouts.iter().map(|o| o.value.to_sat()).sum();
    let total_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
    if total_out > total_in {
        return invalid(format!("outputs {total_out} exceed inputs {total_in}"));
    }

    if let Some((i, o)) = tx
        .output
        .iter()
        .enumerate()
        .find(|(_, o)| o.value.to_sat() > 0 && o.value.to_sat() < DUST_LIMIT)
    {
        return invalid(format!("output {i} is dust ({} sat)", o.value.to_sat()));
    }

    let fee = total_in - total_out;
    let estimate = estimate_fee(estimate_size(tx.input.len(), &tx.output), signed.fee_per_kb())?.max(1);
    if fee < estimate / FEE_SECURITY_MARGIN {
        return invalid(format!("fee {fee} too low (estimate {estimate})"));
    }
    // Change below the dust limit is folded into the fee.
    let ceiling = estimate.saturating_mul(FEE_SECURITY_MARGIN).saturating_add(DUST_LIMIT);
    if fee > ceiling {
        return invalid(format!("fee {fee} too high (estimate {estimate})"));
    }

    let secp = Secp256k1::verification_only();
    for (i, prevout) in prevouts.iter().enumerate() {
        verify_input(&secp, tx, i, prevout)
            .map_err(|e| WalletError::InvalidTransaction(format!("input {i}: {e}")))?;
    }
    Ok(())
}

/// Hex serialization, validated first when `safe`.
pub fn serialize(signed: &SignedTransaction, safe: bool) -> Result<String, WalletError> {
    if safe {
        check_transaction(signed)?;
    }
    Ok(serialize_hex(signed.transaction()))
}

/// Submits serialized transactions through an [`Indexer`].
#[derive(Clone)]
pub struct Broadcaster {
    indexer: Arc<dyn Indexer>,
}

impl Broadcaster {
    pub fn new(indexer: Arc<dyn Indexer>) -> Self {
        Self { indexer }
    }

    /// Serialize, then relay unless `options.testing`. One submit attempt.
    pub async fn broadcast(
        &self,
        tx: SignedTransaction,
        options: BroadcastOptions,
    ) -> Result<BroadcastOutcome, WalletError> {
        let raw_hex = serialize(&tx, options.safe)?;
        let txid = tx.txid();
        if options.testing {
            debug!(%txid, bytes = raw_hex.len() / 2, "dry run, not relayed");
            return Ok(BroadcastOutcome::DryRun { tx, raw_hex });
        }
        let response = self.indexer.submit(&raw_hex).await?;
        info!(%txid, fee = tx.fee(), "transaction relayed");
        Ok(BroadcastOutcome::Relayed { txid, raw_hex, response })
    }
}
