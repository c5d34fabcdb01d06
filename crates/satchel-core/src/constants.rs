//! Wallet constants. All monetary values in satoshis (1 BSV = 10^8 satoshis).

pub const COIN: u64 = 100_000_000;

/// Smallest non-zero output value relays accept. Outputs below this are
/// stripped from every built transaction; zero-value data outputs are exempt.
pub const DUST_LIMIT: u64 = 546;

/// Default relay fee rate in satoshis per 1000 bytes.
pub const DEFAULT_FEE_PER_KB: u64 = 1000;

/// Size padding applied to the estimated transaction size before the fee
/// rate is applied, expressed as a ratio (`14 / 10` = 1.4).
pub const FEE_ESTIMATE_MULTIPLIER_NUM: u64 = 14;
pub const FEE_ESTIMATE_MULTIPLIER_DEN: u64 = 10;

/// Broadcast sanity bound: a fee outside `[estimate / M, estimate * M]`
/// is rejected by checked serialization.
pub const FEE_SECURITY_MARGIN: u64 = 150;

/// Default number of highest-value UTXOs fed into one transaction.
pub const DEFAULT_MAX_UTXOS: usize = 5;

/// Minimum interval between two remote syncs, in milliseconds.
pub const DEFAULT_UPDATE_DEBOUNCE_MS: u64 = 10_000;

/// Wait between a feed event and the resync it triggers, in milliseconds.
/// Gives the indexer time to ingest the transaction that caused the event.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1_000;

/// Number of addresses past the derivation cursor indexed on each branch.
pub const ADDRESS_LOOKAHEAD: u32 = 20;

/// Upper bound of a single P2PKH input once signed:
/// outpoint (36) + script length (1) + DER signature push (73) + pubkey push (34) + sequence (4).
pub const P2PKH_INPUT_SIZE: usize = 148;

/// Serialized size of a P2PKH output: value (8) + script length (1) + script (25).
pub const P2PKH_OUTPUT_SIZE: usize = 34;

/// Payloads above this size are non-standard on most relays.
pub const STANDARD_DATA_CARRIER_SIZE: usize = 100_000;

/// SIGHASH_ALL combined with the replay-protection FORKID bit.
pub const SIGHASH_ALL_FORKID: u32 = 0x41;

/// Common prefix of every durable storage key.
pub const STORAGE_PREFIX: &str = "satchel";

/// Durable storage keys.
pub mod keys {
    pub const MNEMONIC: &str = "satchel.mnemonic";
    pub const XPRIV: &str = "satchel.xpriv";
    pub const XPUB: &str = "satchel.xpub";
    pub const ADDRESS: &str = "satchel.address";
    pub const CONFIRMED_BALANCE: &str = "satchel.confirmed-balance";
    pub const UNCONFIRMED_BALANCE: &str = "satchel.unconfirmed-balance";
    pub const UTXO: &str = "satchel.utxo";
    pub const SPENT: &str = "satchel.spent";
    pub const NUM: &str = "satchel.num";
    pub const TIMESTAMP: &str = "satchel.timestamp";

    /// Every key written by a snapshot, in storage order.
    pub const ALL: [&str; 10] = [
        MNEMONIC,
        XPRIV,
        XPUB,
        ADDRESS,
        CONFIRMED_BALANCE,
        UNCONFIRMED_BALANCE,
        UTXO,
        SPENT,
        NUM,
        TIMESTAMP,
    ];
}

/// Convert satoshis to a whole-coin amount for display.
pub fn sat_to_bsv(sats: i64) -> f64 {
    sats as f64 / COIN as f64
}

/// Convert a whole-coin amount to satoshis, rounding to the nearest satoshi.
pub fn bsv_to_sat(bsv: f64) -> i64 {
    (bsv * COIN as f64).round() as i64
}
