//! Transaction construction and signing.
//!
//! Provides a builder pattern for constructing transactions:
//! 1. Every supplied UTXO becomes an input
//! 2. Optional payment output, then optional zero-value data output
//! 3. Fee (explicit or estimated) and a change output back to the wallet
//! 4. Dust cleanup
//! 5. Sign every input with the key that controls it

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::VarInt;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use tracing::debug;

use satchel_core::address::{Network, parse_address};
use satchel_core::constants::{
    DEFAULT_FEE_PER_KB, DUST_LIMIT, FEE_ESTIMATE_MULTIPLIER_DEN, FEE_ESTIMATE_MULTIPLIER_NUM,
    P2PKH_INPUT_SIZE, P2PKH_OUTPUT_SIZE,
};
use satchel_core::crypto::sign_input;
use satchel_core::payload::{DataMarker, OpReturnPayload, decode_data_script};
use satchel_core::types::{DerivedKeyRef, Utxo};

use crate::error::WalletError;
use crate::keys::{DerivedKey, KeyRing};

/// A payment destination and amount in satoshis.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub address: Address,
    pub amount: u64,
}

/// A fully assembled transaction whose inputs are not yet signed.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    /// The transaction with empty unlocking scripts.
    pub tx: Transaction,
    /// The output spent by each input, in input order.
    pub prevouts: Vec<TxOut>,
    /// The key controlling each input, in input order.
    pub input_keys: Vec<DerivedKeyRef>,
    /// Inputs minus outputs, in satoshis.
    pub fee: u64,
    pub fee_per_kb: u64,
}

/// A signed transaction, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    tx: Transaction,
    prevouts: Vec<TxOut>,
    fee: u64,
    fee_per_kb: u64,
}

impl SignedTransaction {
    /// Wrap an already signed transaction with the outputs it spends.
    ///
    /// The fee is taken as inputs minus outputs; nothing else is checked
    /// until the transaction is serialized in safe mode.
    pub fn from_parts(tx: Transaction, prevouts: Vec<TxOut>, fee_per_kb: u64) -> Self {
        let total_in: u64 = prevouts.iter().map(|o| o.value.to_sat()).sum();
        let total_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        Self {
            tx,
            prevouts,
            fee: total_in.saturating_sub(total_out),
            fee_per_kb,
        }
    }

    pub fn into_parts(self) -> (Transaction, Vec<TxOut>) {
        (self.tx, self.prevouts)
    }

    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    pub fn prevouts(&self) -> &[TxOut] {
        &self.prevouts
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn fee_per_kb(&self) -> u64 {
        self.fee_per_kb
    }

    /// Outpoints this transaction consumes.
    pub fn spent_outpoints(&self) -> Vec<OutPoint> {
        self.tx.input.iter().map(|i| i.previous_output).collect()
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        bitcoin::consensus::encode::serialize(&self.tx).len()
    }

    /// Pushes of the first data output, if any.
    pub fn data_pushes(&self) -> Option<Vec<Vec<u8>>> {
        self.tx
            .output
            .iter()
            .find_map(|o| decode_data_script(&o.script_pubkey).ok())
            .map(|(_, pushes)| pushes)
    }
}

fn compact_size_len(n: usize) -> usize {
    VarInt(n as u64).size()
}

/// Estimated serialized size once every input carries a P2PKH signature.
pub fn estimate_size(input_count: usize, outputs: &[TxOut]) -> usize {
    let outs: usize = outputs
        .iter()
        .map(|o| {
            let len = o.script_pubkey.len();
            8 + compact_size_len(len) + len
        })
        .sum();
    4 + compact_size_len(input_count)
        + input_count * P2PKH_INPUT_SIZE
        + compact_size_len(outputs.len())
        + outs
        + 4
}

/// Fee for `size` bytes: the size padded by 1.4, rounded up, at `fee_per_kb`.
pub fn estimate_fee(size: usize, fee_per_kb: u64) -> Result<u64, WalletError> {
    let overflow = || WalletError::InvalidAmount(format!("fee for {size} bytes at {fee_per_kb} sat/kB overflows"));
    let padded = (size as u64)
        .checked_mul(FEE_ESTIMATE_MULTIPLIER_NUM)
        .ok_or_else(overflow)?
        .div_ceil(FEE_ESTIMATE_MULTIPLIER_DEN);
    Ok(padded.checked_mul(fee_per_kb).ok_or_else(overflow)?.div_ceil(1000))
}

/// Remove every non-zero output below the dust limit, in place and keeping
/// order. Zero-value data outputs are kept. Returns how many were removed.
pub fn clean_dust(outputs: &mut Vec<TxOut>) -> usize {
    let before = outputs.len();
    outputs.retain(|o| {
        let v = o.value.to_sat();
        v == 0 || v >= DUST_LIMIT
    });
    before - outputs.len()
}

/// Builder for constructing and signing transactions.
///
/// # Example
/// ```ignore
/// let mut builder = TransactionBuilder::new();
/// builder
///     .pay_to("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", 10_000, Network::Mainnet)?
///     .set_data(payload);
/// let unsigned = builder.build(&utxos, &keys, DerivedKeyRef::change(0))?;
/// let signed = TransactionBuilder::sign(unsigned, &keys)?;
/// ```
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    payment: Option<Recipient>,
    data: Option<OpReturnPayload>,
    data_marker: DataMarker,
    fee_per_kb: u64,
    fee_override: Option<u64>,
    lock_time: u32,
}

impl TransactionBuilder {
    /// Create a new transaction builder at the default fee rate.
    pub fn new() -> Self {
        Self {
            payment: None,
            data: None,
            data_marker: DataMarker::default(),
            fee_per_kb: DEFAULT_FEE_PER_KB,
            fee_override: None,
            lock_time: 0,
        }
    }

    /// Validate `address` and pay it `amount` satoshis.
    ///
    /// A zero amount still validates the address but adds no output.
    pub fn pay_to(&mut self, address: &str, amount: u64, network: Network) -> Result<&mut Self, WalletError> {
        let address = parse_address(address, network)?;
        self.payment = (amount > 0).then_some(Recipient { address, amount });
        Ok(self)
    }

    /// Pay an already validated address.
    pub fn set_recipient(&mut self, recipient: Recipient) -> &mut Self {
        self.payment = (recipient.amount > 0).then_some(recipient);
        self
    }

    /// Attach a data output.
    pub fn set_data(&mut self, payload: OpReturnPayload) -> &mut Self {
        self.data = Some(payload);
        self
    }

    pub fn set_data_marker(&mut self, marker: DataMarker) -> &mut Self {
        self.data_marker = marker;
        self
    }

    /// Override the fee rate (default: [`DEFAULT_FEE_PER_KB`]).
    pub fn set_fee_per_kb(&mut self, fee_per_kb: u64) -> &mut Self {
        self.fee_per_kb = fee_per_kb;
        self
    }

    /// Pay exactly `fee` satoshis instead of estimating.
    pub fn set_fee(&mut self, fee: u64) -> &mut Self {
        self.fee_override = Some(fee);
        self
    }

    pub fn set_lock_time(&mut self, lock_time: u32) -> &mut Self {
        self.lock_time = lock_time;
        self
    }

    fn fee_for(&self, input_count: usize, outputs: &[TxOut]) -> Result<u64, WalletError> {
        if let Some(fee) = self.fee_override {
            return Ok(fee);
        }
        // Priced as if a change output were present.
        let size = estimate_size(input_count, outputs) + P2PKH_OUTPUT_SIZE
            + compact_size_len(outputs.len() + 1)
            - compact_size_len(outputs.len());
        estimate_fee(size, self.fee_per_kb)
    }

    /// Append change for whatever the inputs leave after outputs and fee.
    /// Returns `(fee, change)`.
    fn attach_change(
        &self,
        outputs: &mut Vec<TxOut>,
        total_in: u64,
        input_count: usize,
        change_script: &ScriptBuf,
    ) -> Result<(u64, u64), WalletError> {
        let spend: u64 = outputs.iter().map(|o| o.value.to_sat()).sum();
        let fee = self.fee_for(input_count, outputs)?;
        let need = spend
            .checked_add(fee)
            .ok_or_else(|| WalletError::InvalidAmount("output total overflow".into()))?;
        if total_in < need {
            return Err(WalletError::InsufficientFunds { have: total_in, need });
        }
        let change = total_in - need;
        if change > 0 {
            outputs.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: change_script.clone(),
            });
        }
        Ok((fee, change))
    }

    /// Assemble inputs and outputs for `utxos`, sending change to
    /// `change_ref`.
    pub fn build(
        &self,
        utxos: &[Utxo],
        keys: &KeyRing,
        change_ref: DerivedKeyRef,
    ) -> Result<UnsignedTransaction, WalletError> {
        if utxos.is_empty() {
            return Err(WalletError::NoUtxos);
        }

        // Inputs
        let mut inputs = Vec::with_capacity(utxos.len());
        let mut prevouts = Vec::with_capacity(utxos.len());
        let mut input_keys = Vec::with_capacity(utxos.len());
        let mut total_in: u64 = 0;
        for utxo in utxos {
            let key = resolve_key(keys, utxo)?;
            total_in = total_in
                .checked_add(utxo.satoshis)
                .ok_or_else(|| WalletError::InvalidAmount("input total overflow".into()))?;
            prevouts.push(TxOut {
                value: Amount::from_sat(utxo.satoshis),
                script_pubkey: utxo.script.clone().unwrap_or_else(|| key.script_pubkey()),
            });
            inputs.push(TxIn {
                previous_output: utxo.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            });
            input_keys.push(key.key_ref);
        }

        // Payment, then data
        let mut outputs = Vec::with_capacity(3);
        if let Some(r) = &self.payment {
            outputs.push(TxOut {
                value: Amount::from_sat(r.amount),
                script_pubkey: r.address.script_pubkey(),
            });
        }
        if let Some(payload) = &self.data {
            outputs.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: payload.to_script(self.data_marker)?,
            });
        }

        // Fee and change, then dust
        let change_script = keys.derive(change_ref)?.script_pubkey();
        let (_, change) = self.attach_change(&mut outputs, total_in, inputs.len(), &change_script)?;
        let removed = clean_dust(&mut outputs);
        let change_dropped = change > 0 && change < DUST_LIMIT;
        if removed > usize::from(change_dropped) {
            // A payment was dust: return its value through change.
            if change >= DUST_LIMIT {
                outputs.pop();
            }
            self.attach_change(&mut outputs, total_in, inputs.len(), &change_script)?;
            clean_dust(&mut outputs);
        }

        let total_out: u64 = outputs.iter().map(|o| o.value.to_sat()).sum();
        let fee = total_in - total_out;
        debug!(
            inputs = inputs.len(),
            outputs = outputs.len(),
            total_in,
            fee,
            "assembled transaction"
        );

        Ok(UnsignedTransaction {
            tx: Transaction {
                version: Version::ONE,
                lock_time: LockTime::from_consensus(self.lock_time),
                input: inputs,
                output: outputs,
            },
            prevouts,
            input_keys,
            fee,
            fee_per_kb: self.fee_per_kb,
        })
    }

    /// Sign every input with the key recorded for it at build time.
    pub fn sign(unsigned: UnsignedTransaction, keys: &KeyRing) -> Result<SignedTransaction, WalletError> {
        let secp = Secp256k1::signing_only();
        let mut tx = unsigned.tx;
        for (i, key_ref) in unsigned.input_keys.iter().enumerate() {
            let key = keys.derive(*key_ref)?;
            sign_input(&secp, &mut tx, i, &unsigned.prevouts[i], &key.private_key)?;
        }
        Ok(SignedTransaction {
            tx,
            prevouts: unsigned.prevouts,
            fee: unsigned.fee,
            fee_per_kb: unsigned.fee_per_kb,
        })
    }

    /// [`build`](Self::build) then [`sign`](Self::sign).
    pub fn build_signed(
        &self,
        utxos: &[Utxo],
        keys: &KeyRing,
        change_ref: DerivedKeyRef,
    ) -> Result<SignedTransaction, WalletError> {
        Self::sign(self.build(utxos, keys, change_ref)?, keys)
    }
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the key controlling `utxo` and check it against what the indexer
/// recorded.
fn resolve_key(keys: &KeyRing, utxo: &Utxo) -> Result<DerivedKey, WalletError> {
    let mismatch = |reason: String| WalletError::KeyMismatch {
        outpoint: utxo.outpoint().to_string(),
        reason,
    };
    let key_ref = utxo
        .key_ref()
        .or_else(|| utxo.address.as_deref().and_then(|a| keys.lookup_address(a)))
        .or_else(|| keys.is_single_key().then(|| DerivedKeyRef::receive(0)))
        .ok_or_else(|| mismatch("no derivation path and no known address".into()))?;
    let key = keys.derive(key_ref)?;

    if let Some(address) = &utxo.address {
        if *address != key.address.to_string() {
            return Err(mismatch(format!("recorded address {address}, but {key_ref} is {}", key.address)));
        }
    }
    if let Some(script) = &utxo.script {
        if *script != key.script_pubkey() {
            return Err(mismatch(format!("locking script does not pay {}", key.address)));
        }
    }
    Ok(key)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn clean_dust_leaves_no_dust_and_keeps_order(values in prop::collection::vec(0u64..2_000, 0..30)) {
            let mut outs: Vec<TxOut> = values
                .iter()
                .map(|v| TxOut { value: Amount::from_sat(*v), script_pubkey: ScriptBuf::new() })
                .collect();
            clean_dust(&mut outs);
            let kept: Vec<u64> = outs.iter().map(|o| o.value.to_sat()).collect();
            let expected: Vec<u64> = values.into_iter().filter(|v| *v == 0 || *v >= DUST_LIMIT).collect();
            prop_assert_eq!(kept, expected);
        }

        #[test]
        fn estimated_fee_grows_with_size(a in 0usize..100_000, b in 0usize..100_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(estimate_fee(lo, 1000).unwrap() <= estimate_fee(hi, 1000).unwrap());
        }
    }
}
