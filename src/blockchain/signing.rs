// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Hashing and signing.
//!
//! All digests are keccak-256, the hash the registry and channel contracts
//! verify against. Signatures are secp256k1 with RFC 6979 nonces and
//! low-S normalisation, which is what `ecrecover` accepts.
//!
//! Three things get signed:
//! - chain transactions, using the EIP-155 replay-protected scheme
//! - payment authorizations over `pad32(channel_id) || pad32(amount)`
//! - the hub's authentication challenge

use std::path::Path;

use alloy::{
    consensus::{SignableTransaction, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718,
    primitives::{keccak256, Address, TxKind, B256, U256},
    signers::{local::PrivateKeySigner, SignerSync},
};
use k256::SecretKey;

use super::codec::{self, b256_word, u256_word};
use super::types::{PaymentAuthorization, SignedTransaction, Transaction};

/// Offset added to the recovery id in payment authorizations.
pub const PAYMENT_V_OFFSET: u8 = 27;

/// Errors raised while loading keys or producing signatures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Chain id is missing; refusing to sign without replay protection")]
    MissingChainId,

    #[error("Signing failed: {0}")]
    Signature(String),
}

/// Recoverable ECDSA signature split into its wire components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: B256,
    pub s: B256,
    /// 0 or 1.
    pub recovery_id: u8,
}

impl RecoverableSignature {
    /// `r || s || v` with `v` in {0, 1}.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(self.r.as_slice());
        out[32..64].copy_from_slice(self.s.as_slice());
        out[64] = self.recovery_id;
        out
    }
}

/// keccak-256 of an arbitrary payload.
pub fn hash(data: &[u8]) -> B256 {
    keccak256(data)
}

/// Sign a 32-byte digest.
pub fn sign(digest: &B256, key: &PrivateKeySigner) -> Result<RecoverableSignature, SigningError> {
    let signature = key
        .sign_hash_sync(digest)
        .map_err(|e| SigningError::Signature(e.to_string()))?;

    Ok(RecoverableSignature {
        r: B256::from(signature.r().to_be_bytes::<32>()),
        s: B256::from(signature.s().to_be_bytes::<32>()),
        recovery_id: u8::from(signature.v()),
    })
}

/// Sign a legacy transaction under EIP-155 and serialize it for
/// `eth_sendRawTransaction`.
///
/// A chain id of 0 is rejected: it would produce a signature that can be
/// replayed on any chain.
pub fn sign_transaction(
    tx: &Transaction,
    key: &PrivateKeySigner,
) -> Result<SignedTransaction, SigningError> {
    if tx.chain_id == 0 {
        return Err(SigningError::MissingChainId);
    }

    let legacy = TxLegacy {
        chain_id: Some(tx.chain_id),
        nonce: tx.nonce,
        gas_price: tx.gas_price,
        gas_limit: tx.gas_limit,
        to: TxKind::Call(tx.to),
        value: tx.value,
        input: tx.data.clone().into(),
    };

    let signature = key
        .sign_hash_sync(&legacy.signature_hash())
        .map_err(|e| SigningError::Signature(e.to_string()))?;
    let signed = legacy.into_signed(signature);
    let tx_hash = *signed.hash();

    let envelope = TxEnvelope::from(signed);
    Ok(SignedTransaction::new(envelope.encoded_2718().into(), tx_hash))
}

/// Build the message the channel contract verifies for a payout.
pub fn payment_message(channel_id: B256, cumulative_amount: U256) -> [u8; 64] {
    let mut message = [0u8; 64];
    message[..32].copy_from_slice(&b256_word(channel_id));
    message[32..].copy_from_slice(&u256_word(cumulative_amount));
    message
}

/// Sign a cumulative payment authorization for a channel.
pub fn sign_payment(
    channel_id: B256,
    cumulative_amount: U256,
    key: &PrivateKeySigner,
) -> Result<PaymentAuthorization, SigningError> {
    let message_hash = hash(&payment_message(channel_id, cumulative_amount));
    let signature = sign(&message_hash, key)?;

    Ok(PaymentAuthorization {
        message_hash,
        amount: cumulative_amount,
        v: signature.recovery_id + PAYMENT_V_OFFSET,
        r: signature.r,
        s: signature.s,
    })
}

/// Sign the hub's authentication challenge.
///
/// Returns hex `r || s || v` (no prefix, `v` in {0, 1}), the form the hub's
/// `/Authenticate` endpoint expects.
pub fn sign_auth_challenge(challenge: &str, key: &PrivateKeySigner) -> Result<String, SigningError> {
    let signature = sign(&hash(challenge.as_bytes()), key)?;
    Ok(alloy::hex::encode(signature.to_bytes()))
}

// =============================================================================
// Key loading
// =============================================================================

/// Address controlled by a key.
pub fn address_of(key: &PrivateKeySigner) -> Address {
    key.address()
}

/// Build a signer from raw 32-byte key material.
pub fn signer_from_bytes(bytes: &[u8]) -> Result<PrivateKeySigner, SigningError> {
    PrivateKeySigner::from_slice(bytes).map_err(|e| SigningError::InvalidKey(e.to_string()))
}

/// Parse a private key from PEM (SEC1 or PKCS#8).
pub fn signer_from_pem(pem_str: &str) -> Result<PrivateKeySigner, SigningError> {
    let pem = pem::parse(pem_str)
        .map_err(|e| SigningError::InvalidKey(format!("Invalid PEM: {}", e)))?;

    let secret_key = SecretKey::from_sec1_der(pem.contents())
        .or_else(|_| parse_pkcs8_to_secret_key(pem.contents()))
        .map_err(|e| SigningError::InvalidKey(format!("Invalid key format: {}", e)))?;

    signer_from_bytes(&secret_key.to_bytes())
}

fn parse_pkcs8_to_secret_key(der: &[u8]) -> Result<SecretKey, String> {
    use k256::pkcs8::DecodePrivateKey;
    SecretKey::from_pkcs8_der(der).map_err(|e| e.to_string())
}

/// Load a private key from key storage.
///
/// The file may hold the raw 32 key bytes, a hex string (optionally
/// `0x`-prefixed) or a PEM document.
pub fn load_private_key(path: &Path) -> Result<PrivateKeySigner, SigningError> {
    let contents = std::fs::read(path)
        .map_err(|e| SigningError::InvalidKey(format!("{}: {}", path.display(), e)))?;

    if contents.len() == 32 {
        return signer_from_bytes(&contents);
    }

    let text = std::str::from_utf8(&contents)
        .map_err(|e| SigningError::InvalidKey(format!("Invalid UTF-8: {}", e)))?
        .trim();

    if text.starts_with("-----BEGIN") {
        return signer_from_pem(text);
    }

    let bytes = codec::decode_hex(text).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    signer_from_bytes(&bytes)
}
