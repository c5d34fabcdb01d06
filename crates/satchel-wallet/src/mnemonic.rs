//! BIP-39 mnemonic generation and validation.

use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::WalletError;

/// Words in a wallet phrase (128 bits of entropy).
pub const WORD_COUNT: usize = 12;

/// Collapse whitespace and lowercase.
pub fn normalize(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether a login secret should be treated as a phrase rather than a key.
pub fn looks_like_mnemonic(secret: &str) -> bool {
    secret.split_whitespace().count() == WORD_COUNT
}

/// Parse a 12-word phrase, validating words and checksum.
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, WalletError> {
    let normalized = Zeroizing::new(normalize(phrase));
    let words = normalized.split(' ').filter(|w| !w.is_empty()).count();
    if words != WORD_COUNT {
        return Err(WalletError::InvalidMnemonic(format!(
            "expected {WORD_COUNT} words, got {words}"
        )));
    }
    Mnemonic::parse_in(Language::English, normalized.as_str())
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))
}

/// Derive the 64-byte BIP-39 seed (empty passphrase) from a phrase.
pub fn mnemonic_to_seed(phrase: &str) -> Result<Zeroizing<[u8; 64]>, WalletError> {
    let mnemonic = parse_mnemonic(phrase)?;
    Ok(Zeroizing::new(mnemonic.to_seed("")))
}

/// Generate a fresh 12-word phrase from OS randomness.
pub fn generate_mnemonic() -> Result<Zeroizing<String>, WalletError> {
    let mut entropy = Zeroizing::new([0u8; 16]);
    rand::rngs::OsRng.fill_bytes(&mut entropy[..]);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy[..])
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}
