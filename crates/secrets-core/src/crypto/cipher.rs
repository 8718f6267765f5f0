//! AES-128-GCM-SIV payload encryption and decryption.
//!
//! **Algorithm choice:** AES-GCM-SIV (RFC 8452) is nonce-misuse-resistant —
//! accidental nonce reuse degrades gracefully instead of breaking both
//! confidentiality and authentication the way it would under plain AES-GCM.
//! The key size is 128 bits because a `DataKey`'s `decrypted_data` is fixed
//! at 16 bytes (data model invariant 3).
//!
//! **Do NOT substitute plain AES-128-GCM with a fixed nonce.** A fresh
//! random nonce is generated per call; never reuse one across calls with
//! the same key.

use aes_gcm_siv::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes128GcmSiv, Nonce,
};
use thiserror::Error;

/// Byte length of the payload DEK (128 bits, per the data model).
pub const KEY_LEN: usize = 16;

/// Byte length of an AES-GCM-SIV nonce (96 bits).
pub const NONCE_LEN: usize = 12;

/// Errors produced by the payload cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The DEK is not [`KEY_LEN`] bytes.
    #[error("invalid DEK length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// AEAD encryption or decryption failed (authentication failure on decrypt).
    #[error("aead operation failed")]
    AeadFailure,

    /// The blob is shorter than a nonce; cannot be a valid ciphertext.
    #[error("ciphertext too short to contain a nonce")]
    Truncated,
}

/// The `Encrypt/Decrypt(bytes, key) -> bytes` contract `SecretsCore` uses to
/// seal payloads under a DEK's raw bytes.
///
/// Implementations own their own framing (nonce, tag, version marker) — the
/// core never inspects the blob, it only passes it through the outer
/// envelope codec.
pub trait PayloadCipher: Send + Sync {
    /// Encrypt `plaintext` under `dek` (exactly [`KEY_LEN`] bytes).
    fn encrypt(&self, plaintext: &[u8], dek: &[u8]) -> Result<Vec<u8>, CipherError>;
    /// Decrypt a blob produced by [`PayloadCipher::encrypt`] under `dek`.
    fn decrypt(&self, blob: &[u8], dek: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// Default [`PayloadCipher`]: AES-128-GCM-SIV, blob layout `nonce(12) || ciphertext+tag`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmSivCipher;

impl PayloadCipher for AesGcmSivCipher {
    fn encrypt(&self, plaintext: &[u8], dek: &[u8]) -> Result<Vec<u8>, CipherError> {
        let cipher = build_cipher(dek)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut out = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::AeadFailure)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + out.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.append(&mut out);
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8], dek: &[u8]) -> Result<Vec<u8>, CipherError> {
        if blob.len() < NONCE_LEN {
            return Err(CipherError::Truncated);
        }
        let cipher = build_cipher(dek)?;
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::AeadFailure)
    }
}

fn build_cipher(dek: &[u8]) -> Result<Aes128GcmSiv, CipherError> {
    if dek.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes128GcmSiv::new_from_slice(dek).map_err(|_| CipherError::InvalidKeyLength)
}
