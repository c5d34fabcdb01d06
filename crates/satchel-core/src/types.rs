//! Value types exchanged between the wallet, the indexer and storage.

use bitcoin::bip32::{ChildNumber, DerivationPath};
use bitcoin::{OutPoint, ScriptBuf, Txid};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::constants::bsv_to_sat;

/// Derivation branch under the root key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Branch {
    /// External chain, handed out for payments in.
    Receive = 0,
    /// Internal chain, used for change outputs.
    Change = 1,
}

impl TryFrom<u32> for Branch {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Branch::Receive),
            1 => Ok(Branch::Change),
            other => Err(other),
        }
    }
}

/// Location of a derived key: `m/<branch>/<index>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DerivedKeyRef {
    pub branch: Branch,
    pub index: u32,
}

impl DerivedKeyRef {
    pub fn receive(index: u32) -> Self {
        Self { branch: Branch::Receive, index }
    }

    pub fn change(index: u32) -> Self {
        Self { branch: Branch::Change, index }
    }

    /// Non-hardened BIP-32 path for this reference.
    ///
    /// Returns `None` if `index` falls in the hardened range.
    pub fn path(&self) -> Option<DerivationPath> {
        let branch = ChildNumber::from_normal_idx(self.branch as u32).ok()?;
        let index = ChildNumber::from_normal_idx(self.index).ok()?;
        Some(DerivationPath::from(vec![branch, index]))
    }
}

impl fmt::Display for DerivedKeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m/{}/{}", self.branch as u32, self.index)
    }
}

/// An unspent output owned by the wallet, as reported by the indexer.
///
/// Indexers disagree on field names, so decoding goes through
/// `UtxoRecord`. `chain`/`num` locate the owning key when present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UtxoRecord")]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub satoshis: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Wire shape of an indexer UTXO record.
///
/// Records may carry several spellings of the same field at once
/// (`satoshis` next to `value`, `vout` next to `outputIndex`). Precedence:
/// `satoshis`, then `value`, both in satoshis. `amount` is whole coins and
/// only counts when neither satoshi field is present.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UtxoRecord {
    txid: Txid,
    vout: Option<u32>,
    output_index: Option<u32>,
    #[serde(rename = "tx_pos")]
    tx_pos: Option<u32>,
    satoshis: Option<serde_json::Value>,
    value: Option<serde_json::Value>,
    amount: Option<serde_json::Value>,
    script: Option<String>,
    script_pub_key: Option<String>,
    chain: Option<u32>,
    num: Option<u32>,
    address: Option<String>,
}

impl TryFrom<UtxoRecord> for Utxo {
    type Error = String;

    fn try_from(r: UtxoRecord) -> Result<Self, Self::Error> {
        let vout = r
            .vout
            .or(r.output_index)
            .or(r.tx_pos)
            .ok_or_else(|| format!("utxo {} has no output index", r.txid))?;
        let satoshis = match r.satoshis.as_ref().or(r.value.as_ref()) {
            Some(sats) => lenient_number(sats).max(0) as u64,
            None => r.amount.as_ref().map(lenient_coins).unwrap_or(0),
        };
        let script = r
            .script
            .or(r.script_pub_key)
            .and_then(|hex| ScriptBuf::from_hex(hex.trim()).ok());
        Ok(Utxo {
            txid: r.txid,
            vout,
            satoshis,
            script,
            chain: r.chain,
            num: r.num,
            address: r.address,
        })
    }
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint { txid: self.txid, vout: self.vout }
    }

    /// The owning key, if the indexer reported a valid `(chain, num)` pair.
    pub fn key_ref(&self) -> Option<DerivedKeyRef> {
        let branch = Branch::try_from(self.chain?).ok()?;
        Some(DerivedKeyRef { branch, index: self.num? })
    }
}

/// Confirmed and unconfirmed satoshi balances.
///
/// Signed because optimistic reconciliation of an outgoing transaction can
/// push the unconfirmed figure below zero until the next sync.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

impl Balance {
    pub fn total(&self) -> i64 {
        self.confirmed + self.unconfirmed
    }
}

/// Response of the indexer's wallet status call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerStatus {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub confirmed: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub unconfirmed: i64,
    #[serde(default)]
    pub utxos: Vec<Utxo>,
    #[serde(default, alias = "nextIndex", alias = "num", skip_serializing_if = "Option::is_none")]
    pub next_index: Option<u32>,
}

impl IndexerStatus {
    pub fn balance(&self) -> Balance {
        Balance { confirmed: self.confirmed, unconfirmed: self.unconfirmed }
    }

    /// Receive index the wallet should hand out next.
    ///
    /// Uses the indexer's cursor when reported, else the lowest receive
    /// index that still holds funds, else zero.
    pub fn derivation_cursor(&self) -> u32 {
        if let Some(next) = self.next_index {
            return next;
        }
        self.utxos
            .iter()
            .filter_map(Utxo::key_ref)
            .filter(|r| r.branch == Branch::Receive)
            .map(|r| r.index)
            .min()
            .unwrap_or(0)
    }
}

/// One transaction in the wallet's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub txid: String,
    #[serde(default)]
    pub confirmed: bool,
    /// Indexer-specific detail, kept verbatim.
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// Relay acknowledgement of a submitted transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub txid: Option<String>,
    pub body: serde_json::Value,
}

/// Interpret a JSON number or numeric string, defaulting to zero.
pub fn lenient_number(value: &serde_json::Value) -> i64 {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Interpret a whole-coin JSON number or numeric string as satoshis.
fn lenient_coins(value: &serde_json::Value) -> u64 {
    let coins = match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    bsv_to_sat(coins).max(0) as u64
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(lenient_number(&value))
}
