//! Endpoints and credentials for the remote services.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_STATUS_URL: &str = "https://api.allaboardbitcoin.com";
pub const DEFAULT_RPC_URL: &str = "https://api.bitindex.network";
pub const DEFAULT_PLANARIA_URL: &str = "https://genesis.bitdb.network/q/1FnauZ9aUH2Bex6JzdcV4eNX7oLSSEbxtN/";
pub const DEFAULT_BITSOCKET_URL: &str = "https://chronos.bitdb.network/s/1P6o45vqLdo6X8HRCZk8XuDsniURmXqiXo/";

/// Remote service configuration.
///
/// Query-service and feed URLs are prefixes: the base64 query is appended
/// directly, so they keep their trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Wallet status service (`/xpub/status`, `/address/status`).
    pub status_url: String,
    /// Relay and transaction listing service.
    pub rpc_url: String,
    /// Path segment naming the chain on the relay service.
    pub chain: String,
    /// Sent as the `api_key` header to the relay service.
    pub api_key: Option<String>,
    pub planaria_url: String,
    /// Sent as the `key` header. History lookups fail without it.
    pub planaria_key: Option<String>,
    pub bitsocket_url: String,
    /// Transactions requested per history query page.
    pub history_page_size: usize,
    pub timeout_secs: u64,
    /// Tick interval of the polling feed.
    pub poll_interval_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            status_url: DEFAULT_STATUS_URL.to_string(),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            chain: "main".to_string(),
            api_key: None,
            planaria_url: DEFAULT_PLANARIA_URL.to_string(),
            planaria_key: None,
            bitsocket_url: DEFAULT_BITSOCKET_URL.to_string(),
            history_page_size: 100,
            timeout_secs: 30,
            poll_interval_secs: 30,
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Point every service at one base URL. Used against local mocks.
    pub fn local(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            status_url: base.to_string(),
            rpc_url: base.to_string(),
            planaria_url: format!("{base}/q/"),
            bitsocket_url: format!("{base}/s/"),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: RpcConfig = serde_json::from_str(r#"{"planaria_key": "k", "timeout_secs": 5}"#).unwrap();
        assert_eq!(cfg.planaria_key.as_deref(), Some("k"));
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.status_url, DEFAULT_STATUS_URL);
        assert_eq!(cfg.chain, "main");
    }

    #[test]
    fn local_keeps_prefix_slashes() {
        let cfg = RpcConfig::local("http://127.0.0.1:9000/");
        assert_eq!(cfg.rpc_url, "http://127.0.0.1:9000");
        assert_eq!(cfg.planaria_url, "http://127.0.0.1:9000/q/");
        assert_eq!(cfg.bitsocket_url, "http://127.0.0.1:9000/s/");
    }

    #[test]
    fn poll_interval_never_zero() {
        let cfg = RpcConfig { poll_interval_secs: 0, ..RpcConfig::default() };
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
    }
}
