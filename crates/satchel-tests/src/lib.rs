//! End-to-end test suite for the Satchel wallet.
//!
//! Integration tests drive the `Wallet` facade against in-process mock
//! collaborators: an indexer that records every relay and a feed whose
//! events the test pushes by hand.

pub mod helpers;
