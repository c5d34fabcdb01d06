//! # satchel-rpc: remote services for the Satchel wallet.
//!
//! Implements the collaborator traits from `satchel-core` over HTTP.
//!
//! # Modules
//!
//! - [`config`]: `RpcConfig` endpoints and API keys
//! - [`client`]: `RemoteIndexer`: status, relay and history
//! - [`bitsocket`]: SSE push feed
//! - [`poll`]: interval feed

pub mod bitsocket;
pub mod client;
pub mod config;
pub mod poll;

pub use bitsocket::{BitsocketTransport, SseDecoder};
pub use client::RemoteIndexer;
pub use config::RpcConfig;
pub use poll::PollTransport;
