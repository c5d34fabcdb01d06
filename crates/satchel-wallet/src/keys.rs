//! Root key management and deterministic key derivation.
//!
//! A wallet is rooted either in a BIP-32 extended private key (from a
//! mnemonic or given directly) or in a single WIF private key. HD children
//! live at the non-hardened path `m/<branch>/<index>`: branch 0 hands out
//! receive addresses, branch 1 change addresses. A single-key wallet answers
//! every derivation with its one key.

use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Address, NetworkKind, PrivateKey, PublicKey, ScriptBuf};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

use satchel_core::address::{Network, p2pkh_address};
use satchel_core::constants::ADDRESS_LOOKAHEAD;
use satchel_core::types::{Branch, DerivedKeyRef};

use crate::error::WalletError;
use crate::mnemonic::{looks_like_mnemonic, mnemonic_to_seed};

/// The wallet's root secret.
#[derive(Clone)]
pub enum RootKey {
    Extended(Xpriv),
    Single(PrivateKey),
}

/// A child key with its address.
#[derive(Clone)]
pub struct DerivedKey {
    pub key_ref: DerivedKeyRef,
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
    pub address: Address,
}

impl DerivedKey {
    /// Locking script of outputs paying this key.
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key_ref", &self.key_ref)
            .field("address", &self.address.to_string())
            .finish_non_exhaustive()
    }
}

/// Derivation context for one root key.
///
/// Keeps a reverse lookup from address to derivation reference so outputs
/// the indexer reports only by address can still be matched to a key.
#[derive(Clone)]
pub struct KeyRing {
    root: RootKey,
    network: Network,
    secp: Secp256k1<All>,
    /// Reverse lookup: address -> derivation reference.
    address_index: HashMap<String, DerivedKeyRef>,
    /// Indices below this are present in `address_index` on both branches.
    indexed_to: u32,
}

impl KeyRing {
    fn with_root(root: RootKey, network: Network) -> Self {
        Self {
            root,
            network,
            secp: Secp256k1::new(),
            address_index: HashMap::new(),
            indexed_to: 0,
        }
    }

    /// Root the ring in the BIP-32 master key of a 12-word phrase.
    pub fn from_mnemonic(phrase: &str, network: Network) -> Result<Self, WalletError> {
        let seed = mnemonic_to_seed(phrase)?;
        let master = Xpriv::new_master(network.to_bitcoin(), &seed[..])
            .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        Ok(Self::with_root(RootKey::Extended(master), network))
    }

    /// Parse an `xprv`/`tprv` string.
    pub fn from_xpriv(xpriv: &str, network: Network) -> Result<Self, WalletError> {
        let key = Xpriv::from_str(xpriv.trim()).map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        if key.network != NetworkKind::from(network.to_bitcoin()) {
            return Err(WalletError::InvalidKey(format!("extended key is not for {network}")));
        }
        Ok(Self::with_root(RootKey::Extended(key), network))
    }

    /// Parse a WIF private key into a single-key ring.
    pub fn from_wif(wif: &str, network: Network) -> Result<Self, WalletError> {
        let key = PrivateKey::from_wif(wif.trim()).map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        if key.network != NetworkKind::from(network.to_bitcoin()) {
            return Err(WalletError::InvalidKey(format!("private key is not for {network}")));
        }
        Ok(Self::with_root(RootKey::Single(key), network))
    }

    /// Accept any supported secret: a 12-word phrase, an extended private
    /// key, or a WIF.
    pub fn from_secret(secret: &str, network: Network) -> Result<Self, WalletError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(WalletError::InvalidKey("empty secret".into()));
        }
        if looks_like_mnemonic(secret) {
            return Self::from_mnemonic(secret, network);
        }
        if secret.starts_with("xprv") || secret.starts_with("tprv") {
            return Self::from_xpriv(secret, network);
        }
        Self::from_wif(secret, network).map_err(|_| {
            WalletError::InvalidKey("expected a 12-word mnemonic, an xprv or a WIF key".into())
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn is_single_key(&self) -> bool {
        matches!(self.root, RootKey::Single(_))
    }

    /// The root secret in its string form (`xprv...` or WIF).
    pub fn root_secret(&self) -> Zeroizing<String> {
        match &self.root {
            RootKey::Extended(x) => Zeroizing::new(x.to_string()),
            RootKey::Single(k) => Zeroizing::new(k.to_wif()),
        }
    }

    /// Account extended public key, for HD rings.
    pub fn xpub(&self) -> Option<Xpub> {
        match &self.root {
            RootKey::Extended(x) => Some(Xpub::from_priv(&self.secp, x)),
            RootKey::Single(_) => None,
        }
    }

    /// What the indexer tracks this wallet by: the xpub, or the single address.
    pub fn identity(&self) -> String {
        match &self.root {
            RootKey::Extended(x) => Xpub::from_priv(&self.secp, x).to_string(),
            RootKey::Single(k) => p2pkh_address(&k.public_key(&self.secp), self.network).to_string(),
        }
    }

    fn key_from_private(&self, key_ref: DerivedKeyRef, private_key: PrivateKey) -> DerivedKey {
        let public_key = private_key.public_key(&self.secp);
        DerivedKey {
            key_ref,
            private_key,
            public_key,
            address: p2pkh_address(&public_key, self.network),
        }
    }

    /// Derive the key at `m/<branch>/<index>`. Pure: same input, same key.
    pub fn derive(&self, key_ref: DerivedKeyRef) -> Result<DerivedKey, WalletError> {
        match &self.root {
            RootKey::Single(k) => Ok(self.key_from_private(key_ref, *k)),
            RootKey::Extended(master) => {
                let path = key_ref
                    .path()
                    .ok_or_else(|| WalletError::InvalidKey(format!("{key_ref} is out of range")))?;
                let child = master
                    .derive_priv(&self.secp, &path)
                    .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
                Ok(self.key_from_private(key_ref, child.to_priv()))
            }
        }
    }

    /// Derive an arbitrary BIP-32 path, hardened steps included.
    ///
    /// The returned key's `key_ref` is only meaningful for two-level paths;
    /// it is reported as `m/0/0` otherwise.
    pub fn derive_path(&self, path: &DerivationPath) -> Result<DerivedKey, WalletError> {
        let RootKey::Extended(master) = &self.root else {
            return Err(WalletError::InvalidKey("single-key wallet has no derivation tree".into()));
        };
        let child = master
            .derive_priv(&self.secp, path)
            .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        Ok(self.key_from_private(DerivedKeyRef::receive(0), child.to_priv()))
    }

    /// Index both branches up to `cursor + ADDRESS_LOOKAHEAD`.
    pub fn index_to(&mut self, cursor: u32) -> Result<(), WalletError> {
        if let RootKey::Single(_) = self.root {
            if self.address_index.is_empty() {
                let key = self.derive(DerivedKeyRef::receive(0))?;
                self.address_index.insert(key.address.to_string(), key.key_ref);
            }
            return Ok(());
        }
        let target = cursor.saturating_add(ADDRESS_LOOKAHEAD);
        for index in self.indexed_to..target {
            for branch in [Branch::Receive, Branch::Change] {
                let key = self.derive(DerivedKeyRef { branch, index })?;
                self.address_index.insert(key.address.to_string(), key.key_ref);
            }
        }
        self.indexed_to = self.indexed_to.max(target);
        Ok(())
    }

    /// Find the derivation reference for an indexed address.
    pub fn lookup_address(&self, address: &str) -> Option<DerivedKeyRef> {
        self.address_index.get(address).copied()
    }
}

impl Drop for KeyRing {
    fn drop(&mut self) {
        match &mut self.root {
            RootKey::Extended(x) => x.private_key.non_secure_erase(),
            RootKey::Single(k) => k.inner.non_secure_erase(),
        }
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("network", &self.network)
            .field("single_key", &self.is_single_key())
            .field("indexed_to", &self.indexed_to)
            .finish_non_exhaustive()
    }
}
