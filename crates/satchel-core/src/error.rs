//! Error types shared across the Satchel crates.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
    #[error("malformed unlocking script on input {0}")] MalformedScriptSig(usize),
    #[error("unsupported sighash type {found:#04x} on input {index}")] UnsupportedSighash { index: usize, found: u8 },
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("pubkey hash does not match the spent output")] PubkeyHashMismatch,
    #[error("signature verification failed")] VerificationFailed,
    #[error("push too large: {0} bytes")] PushTooLarge(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("cannot parse {address}: {reason}")] Parse { address: String, reason: String },
    #[error("{address} is not a {expected} address")] WrongNetwork { address: String, expected: String },
    #[error("{0} is not a pay-to-pubkey-hash address")] UnsupportedType(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("segment {index} is not valid hex: {reason}")] InvalidHex { index: usize, reason: String },
    #[error("segment {index} too large to push: {len} bytes")] PushTooLarge { index: usize, len: usize },
    #[error("script is not a data output")] NotDataScript,
    #[error("malformed data script: {0}")] Malformed(String),
}

/// Failures talking to the remote indexer, relay or push feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexerError {
    #[error("transport: {0}")] Transport(String),
    #[error("rejected with status {status}: {body}")] Rejected { status: u16, body: String },
    #[error("configuration: {0}")] Configuration(String),
    #[error("decode: {0}")] Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("io: {0}")] Io(String),
    #[error("corrupt store: {0}")] Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sighash_error_formats_hex() {
        let e = CryptoError::UnsupportedSighash { index: 2, found: 0x01 };
        assert_eq!(e.to_string(), "unsupported sighash type 0x01 on input 2");
    }

    #[test]
    fn rejected_carries_status_and_body() {
        let e = IndexerError::Rejected { status: 400, body: "bad-txns".into() };
        assert_eq!(e.to_string(), "rejected with status 400: bad-txns");
    }

    #[test]
    fn address_errors_name_the_address() {
        let e = AddressError::WrongNetwork { address: "mabc".into(), expected: "bitcoin".into() };
        assert!(e.to_string().contains("mabc"));
        assert!(AddressError::UnsupportedType("3xyz".into()).to_string().contains("3xyz"));
    }
}
