//! Wallet behaviour settings.
//!
//! [`WalletConfig`] deserializes with every field optional, so a config file
//! only needs the values it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use satchel_core::address::Network;
use satchel_core::constants::{
    DEFAULT_FEE_PER_KB, DEFAULT_MAX_UTXOS, DEFAULT_SETTLE_DELAY_MS, DEFAULT_UPDATE_DEBOUNCE_MS,
};
use satchel_core::payload::DataMarker;

/// Configuration for a wallet instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub network: Network,
    /// Relay fee rate in satoshis per 1000 bytes.
    pub fee_per_kb: u64,
    /// Highest-value UTXOs spent per transaction; 0 spends all.
    pub max_utxos: usize,
    /// Minimum interval between two remote syncs.
    pub update_debounce_ms: u64,
    /// Wait after a feed event before resyncing.
    pub settle_delay_ms: u64,
    /// How data outputs open.
    pub data_marker: DataMarker,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            fee_per_kb: DEFAULT_FEE_PER_KB,
            max_utxos: DEFAULT_MAX_UTXOS,
            update_debounce_ms: DEFAULT_UPDATE_DEBOUNCE_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            data_marker: DataMarker::OpReturn,
        }
    }
}

impl WalletConfig {
    pub fn update_debounce(&self) -> Duration {
        Duration::from_millis(self.update_debounce_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = WalletConfig::default();
        assert_eq!(cfg.network, Network::Mainnet);
        assert_eq!(cfg.fee_per_kb, 1000);
        assert_eq!(cfg.max_utxos, 5);
        assert_eq!(cfg.update_debounce(), Duration::from_secs(10));
        assert_eq!(cfg.settle_delay(), Duration::from_secs(1));
        assert_eq!(cfg.data_marker, DataMarker::OpReturn);
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let cfg: WalletConfig =
            serde_json::from_str(r#"{"fee_per_kb": 500, "data_marker": "safe_op_return"}"#).unwrap();
        assert_eq!(cfg.fee_per_kb, 500);
        assert_eq!(cfg.data_marker, DataMarker::SafeOpReturn);
        assert_eq!(cfg.max_utxos, DEFAULT_MAX_UTXOS);
    }

    #[test]
    fn network_by_name() {
        let cfg: WalletConfig = serde_json::from_str(r#"{"network": "testnet"}"#).unwrap();
        assert_eq!(cfg.network, Network::Testnet);
    }

    #[test]
    fn config_is_clone_and_debug() {
        let cfg = WalletConfig { max_utxos: 0, ..WalletConfig::default() };
        let debug = format!("{:?}", cfg.clone());
        assert!(debug.contains("WalletConfig"));
    }
}
