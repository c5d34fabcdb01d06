//! Address handling for P2PKH payment destinations.
//!
//! Satchel only ever pays to and receives on legacy base58 pay-to-pubkey-hash
//! addresses (`1...` on mainnet, `m...`/`n...` on testnet). Validation checks
//! the encoding, the network and the script type, so a P2SH or wrong-network
//! destination is refused before any transaction is built.

use bitcoin::address::AddressType;
use bitcoin::{Address, PublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;

/// Network a wallet operates on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network (addresses start with `1`).
    #[default]
    Mainnet,
    /// Test network (addresses start with `m` or `n`).
    Testnet,
}

impl Network {
    /// The `bitcoin` crate network with matching version bytes.
    pub fn to_bitcoin(self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
        }
    }

    /// Block explorer base URL for this network.
    pub fn explorer_base(self) -> &'static str {
        match self {
            Network::Mainnet => "https://whatsonchain.com",
            Network::Testnet => "https://test.whatsonchain.com",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "livenet" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(AddressError::Parse {
                address: other.to_string(),
                reason: "unknown network".to_string(),
            }),
        }
    }
}

/// Parse and validate a payment destination.
///
/// Fails if the string is not valid base58check, belongs to another network,
/// or encodes anything other than a pubkey hash.
pub fn parse_address(address: &str, network: Network) -> Result<Address, AddressError> {
    let unchecked = Address::from_str(address.trim()).map_err(|e| AddressError::Parse {
        address: address.to_string(),
        reason: e.to_string(),
    })?;
    let checked = unchecked
        .require_network(network.to_bitcoin())
        .map_err(|_| AddressError::WrongNetwork {
            address: address.to_string(),
            expected: network.to_string(),
        })?;
    if checked.address_type() != Some(AddressType::P2pkh) {
        return Err(AddressError::UnsupportedType(address.to_string()));
    }
    Ok(checked)
}

/// Whether `address` is a usable P2PKH destination on `network`.
pub fn is_valid_address(address: &str, network: Network) -> bool {
    parse_address(address, network).is_ok()
}

/// The P2PKH address controlled by `public_key`.
pub fn p2pkh_address(public_key: &PublicKey, network: Network) -> Address {
    Address::p2pkh(public_key.pubkey_hash(), network.to_bitcoin())
}

/// Explorer page for an address.
pub fn address_link(address: &str, network: Network) -> String {
    format!("{}/address/{address}", network.explorer_base())
}

/// Explorer page for a transaction.
pub fn tx_link(txid: &str, network: Network) -> String {
    format!("{}/tx/{txid}", network.explorer_base())
}
