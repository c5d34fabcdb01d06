//! Wallet error types.

use satchel_core::error::{AddressError, CryptoError, IndexerError, PayloadError, StoreError};
use thiserror::Error;

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// A key was requested before any root key was loaded.
    #[error("wallet not initialized: no root key")]
    NotInitialized,

    /// The phrase is not a valid 12-word BIP-39 mnemonic.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// The secret is neither a mnemonic, an extended private key nor a WIF.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Payment destination failed format, network or type validation.
    #[error("invalid address {address}: {reason}")]
    InvalidAddress {
        /// The rejected destination, as given.
        address: String,
        reason: String,
    },

    /// Invalid monetary amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Operation requires a logged-in wallet.
    #[error("not logged in")]
    NotLoggedIn,

    /// Identity is fixed for the session; log out first.
    #[error("already logged in")]
    AlreadyLoggedIn,

    /// No derivable key controls an input.
    #[error("no key for {outpoint}: {reason}")]
    KeyMismatch {
        /// The unspendable output, as `txid:vout`.
        outpoint: String,
        reason: String,
    },

    /// No UTXOs available for spending.
    #[error("no UTXOs available")]
    NoUtxos,

    /// Insufficient funds to cover the outputs plus fee.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Selected input value in satoshis.
        have: u64,
        /// Outputs plus fee in satoshis.
        need: u64,
    },

    /// Checked serialization refused the transaction.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The relay answered with a non-success status.
    #[error("broadcast failed (status {status:?}): {body}")]
    BroadcastFailed {
        status: Option<u16>,
        body: String,
    },

    /// The remote service could not be reached or answered garbage.
    #[error("transport: {0}")]
    TransportError(String),

    /// A required setting (API key, endpoint) is missing.
    #[error("configuration: {0}")]
    ConfigurationError(String),

    /// A registered hook vetoed the operation.
    #[error("rejected by hook: {0}")]
    HookRejected(String),

    /// Durable storage failure.
    #[error("storage: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization: {0}")]
    Serialization(String),

    /// Signing or signature verification failure from satchel-core.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Data payload encoding failure from satchel-core.
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl From<IndexerError> for WalletError {
    fn from(e: IndexerError) -> Self {
        match e {
            IndexerError::Transport(msg) | IndexerError::Decode(msg) => WalletError::TransportError(msg),
            IndexerError::Rejected { status, body } => WalletError::BroadcastFailed {
                status: Some(status),
                body,
            },
            IndexerError::Configuration(msg) => WalletError::ConfigurationError(msg),
        }
    }
}

impl From<StoreError> for WalletError {
    fn from(e: StoreError) -> Self {
        WalletError::Storage(e.to_string())
    }
}

impl From<AddressError> for WalletError {
    fn from(e: AddressError) -> Self {
        let address = match &e {
            AddressError::Parse { address, .. }
            | AddressError::WrongNetwork { address, .. }
            | AddressError::UnsupportedType(address) => address.clone(),
        };
        WalletError::InvalidAddress { address, reason: e.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_funds() {
        let e = WalletError::InsufficientFunds { have: 100, need: 200 };
        assert_eq!(e.to_string(), "insufficient funds: have 100, need 200");
    }

    #[test]
    fn display_not_logged_in() {
        assert_eq!(WalletError::NotLoggedIn.to_string(), "not logged in");
    }

    #[test]
    fn display_key_mismatch_names_outpoint() {
        let e = WalletError::KeyMismatch { outpoint: "ab:1".into(), reason: "no key".into() };
        assert_eq!(e.to_string(), "no key for ab:1: no key");
    }

    #[test]
    fn clone_and_eq() {
        let e1 = WalletError::InvalidAmount("zero".into());
        assert_eq!(e1.clone(), e1);
    }

    #[test]
    fn rejected_maps_to_broadcast_failed() {
        let e: WalletError = IndexerError::Rejected { status: 500, body: "boom".into() }.into();
        assert_eq!(e, WalletError::BroadcastFailed { status: Some(500), body: "boom".into() });
    }

    #[test]
    fn transport_and_decode_map_to_transport() {
        let a: WalletError = IndexerError::Transport("refused".into()).into();
        let b: WalletError = IndexerError::Decode("eof".into()).into();
        assert_eq!(a, WalletError::TransportError("refused".into()));
        assert_eq!(b, WalletError::TransportError("eof".into()));
    }

    #[test]
    fn missing_config_maps_to_configuration_error() {
        let e: WalletError = IndexerError::Configuration("no api key".into()).into();
        assert_eq!(e, WalletError::ConfigurationError("no api key".into()));
    }

    #[test]
    fn address_error_keeps_address() {
        let e: WalletError = AddressError::UnsupportedType("3abc".into()).into();
        assert!(matches!(e, WalletError::InvalidAddress { ref address, .. } if address == "3abc"));
    }

    #[test]
    fn from_crypto_error() {
        let e: WalletError = CryptoError::VerificationFailed.into();
        assert_eq!(e, WalletError::Crypto(CryptoError::VerificationFailed));
    }
}
