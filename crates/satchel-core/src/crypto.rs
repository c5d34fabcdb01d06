//! Transaction input signing with replay-protected sighash.
//!
//! # Signing scheme
//!
//! Inputs are signed with `SIGHASH_ALL | FORKID` (`0x41`). The digest follows
//! the BIP-143 layout, which commits to the value of the output being spent:
//! - version
//! - double-SHA256 of all outpoints, of all sequences and of all outputs
//! - the outpoint, script code, value and sequence of the signed input
//! - lock time and the 4-byte sighash type
//!
//! Unlocking scripts are excluded from the digest, so inputs can be signed
//! in any order.

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{Hash, sha256d};
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1, Signing, Verification, ecdsa};
use bitcoin::{Amount, PrivateKey, PublicKey, Script, ScriptBuf, Transaction, TxOut};

use crate::constants::SIGHASH_ALL_FORKID;
use crate::error::CryptoError;

/// Compute the digest signed by input `input_index`.
///
/// `script_code` is the locking script of the spent output and `value` its
/// amount.
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: Amount,
    sighash_type: u32,
) -> Result<[u8; 32], CryptoError> {
    let input = tx.input.get(input_index).ok_or(CryptoError::InputIndexOutOfBounds {
        index: input_index,
        len: tx.input.len(),
    })?;

    let mut prevouts = Vec::with_capacity(tx.input.len() * 36);
    let mut sequences = Vec::with_capacity(tx.input.len() * 4);
    for txin in &tx.input {
        prevouts.extend_from_slice(&serialize(&txin.previous_output));
        sequences.extend_from_slice(&txin.sequence.0.to_le_bytes());
    }
    let mut outputs = Vec::new();
    for txout in &tx.output {
        outputs.extend_from_slice(&serialize(txout));
    }

    let mut data = Vec::with_capacity(160 + script_code.len());
    data.extend_from_slice(&tx.version.0.to_le_bytes());
    data.extend_from_slice(sha256d::Hash::hash(&prevouts).as_byte_array());
    data.extend_from_slice(sha256d::Hash::hash(&sequences).as_byte_array());
    data.extend_from_slice(&serialize(&input.previous_output));
    data.extend_from_slice(&serialize(&script_code.to_owned()));
    data.extend_from_slice(&value.to_sat().to_le_bytes());
    data.extend_from_slice(&input.sequence.0.to_le_bytes());
    data.extend_from_slice(sha256d::Hash::hash(&outputs).as_byte_array());
    data.extend_from_slice(&tx.lock_time.to_consensus_u32().to_le_bytes());
    data.extend_from_slice(&sighash_type.to_le_bytes());

    Ok(sha256d::Hash::hash(&data).to_byte_array())
}

/// Build a P2PKH unlocking script: `<DER signature || hashtype> <pubkey>`.
pub fn unlocking_script(
    signature: &ecdsa::Signature,
    sighash_type: u8,
    public_key: &PublicKey,
) -> Result<ScriptBuf, CryptoError> {
    let mut sig = signature.serialize_der().to_vec();
    sig.push(sighash_type);
    let sig_len = sig.len();
    let sig = PushBytesBuf::try_from(sig).map_err(|_| CryptoError::PushTooLarge(sig_len))?;
    let pk = PushBytesBuf::try_from(public_key.to_bytes())
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(Builder::new().push_slice(sig).push_slice(pk).into_script())
}

/// Sign a P2PKH input in place.
pub fn sign_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &mut Transaction,
    input_index: usize,
    prevout: &TxOut,
    key: &PrivateKey,
) -> Result<(), CryptoError> {
    let digest = signature_hash(
        tx,
        input_index,
        &prevout.script_pubkey,
        prevout.value,
        SIGHASH_ALL_FORKID,
    )?;
    let signature = secp.sign_ecdsa(&Message::from_digest(digest), &key.inner);
    let script_sig = unlocking_script(&signature, SIGHASH_ALL_FORKID as u8, &key.public_key(secp))?;
    tx.input[input_index].script_sig = script_sig;
    Ok(())
}

/// Verify a P2PKH input's unlocking script against the output it spends.
///
/// Checks that:
/// 1. the unlocking script is exactly a signature push and a pubkey push
/// 2. the hashtype byte is `SIGHASH_ALL | FORKID`
/// 3. the pubkey hashes to the one locked in `prevout`
/// 4. the signature verifies against the digest
pub fn verify_input<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    prevout: &TxOut,
) -> Result<(), CryptoError> {
    let input = tx.input.get(input_index).ok_or(CryptoError::InputIndexOutOfBounds {
        index: input_index,
        len: tx.input.len(),
    })?;

    let mut pushes = Vec::with_capacity(2);
    for instruction in input.script_sig.instructions() {
        match instruction {
            Ok(Instruction::PushBytes(p)) => pushes.push(p.as_bytes()),
            _ => return Err(CryptoError::MalformedScriptSig(input_index)),
        }
    }
    let [sig_push, pk_push] = pushes[..] else {
        return Err(CryptoError::MalformedScriptSig(input_index));
    };

    let (&hashtype, der) = sig_push.split_last().ok_or(CryptoError::InvalidSignature)?;
    if u32::from(hashtype) != SIGHASH_ALL_FORKID {
        return Err(CryptoError::UnsupportedSighash { index: input_index, found: hashtype });
    }

    let pk = PublicKey::from_slice(pk_push).map_err(|_| CryptoError::InvalidPublicKey)?;
    if ScriptBuf::new_p2pkh(&pk.pubkey_hash()) != prevout.script_pubkey {
        return Err(CryptoError::PubkeyHashMismatch);
    }

    let signature = ecdsa::Signature::from_der(der).map_err(|_| CryptoError::InvalidSignature)?;
    let digest = signature_hash(
        tx,
        input_index,
        &prevout.script_pubkey,
        prevout.value,
        SIGHASH_ALL_FORKID,
    )?;
    secp.verify_ecdsa(&Message::from_digest(digest), &signature, &pk.inner)
        .map_err(|_| CryptoError::VerificationFailed)
}
