//! # satchel-core
//! Foundation types, codecs and collaborator traits for the Satchel wallet.

pub mod address;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod feed;
pub mod payload;
pub mod traits;
pub mod types;
