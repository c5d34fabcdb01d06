//! Push-feed messages and the query documents sent to the feed and to the
//! transaction query service.
//!
//! Both services take a JSON query, base64-encoded into the URL path. Feed
//! messages carry decoded transactions whose inputs and outputs expose the
//! address (`e.a`) and value (`e.v`) they move.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;

use crate::types::lenient_number;

/// Query language version understood by the feed and query services.
pub const QUERY_VERSION: u32 = 3;

/// What a feed message reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// A transaction seen in the mempool.
    Transaction,
    /// A block was mined; confirmations changed.
    Block,
    /// Subscription handshake.
    Open,
    Other,
}

/// One decoded feed message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Vec<FeedTransaction>,
}

impl FeedMessage {
    pub fn kind(&self) -> MessageKind {
        match self.kind.as_str() {
            "t" | "mempool" => MessageKind::Transaction,
            "block" | "b" => MessageKind::Block,
            "open" => MessageKind::Open,
            _ => MessageKind::Other,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TxHash {
    #[serde(default)]
    pub h: String,
}

/// A transaction as the feed describes it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedTransaction {
    #[serde(default)]
    pub tx: TxHash,
    #[serde(default, rename = "in")]
    pub inputs: Vec<FeedIo>,
    #[serde(default, rename = "out")]
    pub outputs: Vec<FeedIo>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedIo {
    #[serde(default)]
    pub e: FeedEdge,
}

/// Address and value of one input or output. The feed sends `false` for
/// outputs with no recognisable address, so `a` stays untyped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEdge {
    #[serde(default)]
    pub a: Value,
    #[serde(default)]
    pub v: Value,
}

impl FeedEdge {
    pub fn address(&self) -> Option<&str> {
        self.a.as_str()
    }

    pub fn value(&self) -> u64 {
        lenient_number(&self.v).max(0) as u64
    }
}

/// Satoshis a transaction moves out of and into a set of watched addresses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatchedFlow {
    pub outgoing: u64,
    pub incoming: u64,
}

impl WatchedFlow {
    pub fn is_empty(&self) -> bool {
        self.outgoing == 0 && self.incoming == 0
    }
}

impl FeedTransaction {
    pub fn txid(&self) -> &str {
        &self.tx.h
    }

    /// Sum watched input values (outgoing) and watched output values (incoming).
    pub fn watched_flow(&self, watched: &HashSet<String>) -> WatchedFlow {
        let sum = |ios: &[FeedIo]| -> u64 {
            ios.iter()
                .filter(|io| io.e.address().is_some_and(|a| watched.contains(a)))
                .map(|io| io.e.value())
                .sum()
        };
        WatchedFlow { outgoing: sum(&self.inputs), incoming: sum(&self.outputs) }
    }
}

/// What a feed transport yields to the activity monitor.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    Message(FeedMessage),
    /// Periodic wake-up from a polling transport; carries no delta.
    Tick,
}

/// Subscription matching any transaction that spends from or pays to one of
/// `addresses`.
pub fn address_activity_query(addresses: &[String]) -> Value {
    json!({
        "v": QUERY_VERSION,
        "q": {
            "find": {
                "$or": [
                    { "in.e.a": { "$in": addresses } },
                    { "out.e.a": { "$in": addresses } }
                ]
            }
        }
    })
}

/// One page of transactions by id. `page` is 1-based.
pub fn transactions_query(txids: &[String], limit: usize, page: usize) -> Value {
    json!({
        "v": QUERY_VERSION,
        "q": {
            "find": { "tx.h": { "$in": txids } },
            "limit": limit,
            "skip": page.saturating_sub(1) * limit
        }
    })
}

/// Encode a query for use as a URL path segment.
pub fn encode_query(query: &Value) -> String {
    STANDARD.encode(query.to_string())
}
