//! CLI configuration: defaults, then `config.toml`, then `SATCHEL__*` variables.
//!
//! Nested keys use a double underscore, e.g. `SATCHEL__RPC__PLANARIA_KEY`
//! or `SATCHEL__WALLET__FEE_PER_KB`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use satchel_rpc::RpcConfig;
use satchel_wallet::WalletConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Where the wallet store lives (default: `~/.satchel`).
    pub data_dir: Option<PathBuf>,
    pub wallet: WalletConfig,
    pub rpc: RpcConfig,
}

impl CliConfig {
    /// Layer the optional file at `path` and the environment over defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("SATCHEL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        settings.try_deserialize().context("Invalid configuration")
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_dir(),
        }
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("wallet.json"))
    }
}

/// `~/.satchel`.
pub fn default_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".satchel"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_core::address::Network;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CliConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.wallet, WalletConfig::default());
        assert_eq!(cfg.rpc, RpcConfig::default());
    }

    #[test]
    fn file_overrides_nested_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "data_dir = \"/tmp/satchel\"\n\n[wallet]\nnetwork = \"testnet\"\nfee_per_kb = 500\n\n[rpc]\nplanaria_key = \"abc\"\n",
        )
        .unwrap();
        let cfg = CliConfig::load(&path).unwrap();
        assert_eq!(cfg.wallet.network, Network::Testnet);
        assert_eq!(cfg.wallet.fee_per_kb, 500);
        assert_eq!(cfg.rpc.planaria_key.as_deref(), Some("abc"));
        assert_eq!(cfg.store_path().unwrap(), PathBuf::from("/tmp/satchel/wallet.json"));
    }
}
