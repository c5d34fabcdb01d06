//! # satchel-wallet: HD wallet with OP_RETURN data transactions.
//!
//! Derives P2PKH keys from a mnemonic, extended key or WIF, builds and signs
//! payment and data transactions with a fixed fee rate, persists session
//! state in a string key-value store, and reconciles that state against a
//! remote indexer and a live activity feed.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`mnemonic`]: BIP-39 phrase handling
//! - [`keys`]: `KeyRing`, BIP-32 derivation and address indexing
//! - [`coin_selection`]: Highest-value-first UTXO selection
//! - [`builder`]: Transaction builder with fee estimation, dust cleanup and signing
//! - [`broadcast`]: Checked serialization and relay
//! - [`storage`]: In-memory and JSON-file key-value stores
//! - [`state`]: Persisted wallet snapshot
//! - [`sync`]: Indexer reconciliation with debounce
//! - [`monitor`]: Live activity monitor
//! - [`hooks`]: Lifecycle observers
//! - [`config`]: `WalletConfig`
//! - [`wallet`]: High-level wallet composition

pub mod broadcast;
pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod error;
pub mod hooks;
pub mod keys;
pub mod mnemonic;
pub mod monitor;
pub mod state;
pub mod storage;
pub mod sync;
pub mod wallet;

// Re-exports for convenient access
pub use broadcast::{BroadcastOptions, BroadcastOutcome, Broadcaster};
pub use builder::{Recipient, SignedTransaction, TransactionBuilder, UnsignedTransaction};
pub use coin_selection::UtxoSelector;
pub use config::WalletConfig;
pub use error::WalletError;
pub use hooks::{HookRegistry, WalletHook};
pub use keys::{DerivedKey, KeyRing};
pub use monitor::{ActivityEvent, ActivityMonitor, AddressResolver, Direction, MonitorHandle, MonitorStatus};
pub use state::{WalletSnapshot, WalletState};
pub use storage::{FileStore, MemoryStore};
pub use wallet::Wallet;
