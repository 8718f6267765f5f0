//! Password-derived local key-wrapping provider.
//!
//! Registers under an id such as `secretKey.v1`. The wrapping key is derived
//! from a master passphrase with Argon2id and a fresh random salt per call —
//! the same "passphrase → symmetric key" pattern as a disk-backed keystore,
//! minus the keystore: this provider never touches the filesystem, it only
//! wraps the bytes handed to it.
//!
//! Wire format: `salt(16) || nonce(12) || ciphertext+tag`.

use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};
use argon2::Argon2;
use async_trait::async_trait;
use common::ProviderId;

use super::{KmsError, KmsProvider};
use crate::crypto::{AesGcmSivCipher, PayloadCipher, KEY_LEN};

const SALT_LEN: usize = 16;

/// Wraps DEK bytes under a key derived from a master passphrase.
pub struct LocalKmsProvider {
    id: ProviderId,
    master_password: String,
    cipher: AesGcmSivCipher,
}

impl LocalKmsProvider {
    /// Create a provider registering under `id`, deriving keys from `master_password`.
    pub fn new(id: impl Into<ProviderId>, master_password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            master_password: master_password.into(),
            cipher: AesGcmSivCipher,
        }
    }

    fn derive_key(&self, salt: &[u8]) -> Result<Vec<u8>, KmsError> {
        let mut key = vec![0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.master_password.as_bytes(), salt, &mut key)
            .map_err(|_| KmsError::CryptoFailure)?;
        Ok(key)
    }
}

#[async_trait]
impl KmsProvider for LocalKmsProvider {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    async fn encrypt(&self, raw_dek: &[u8]) -> Result<Vec<u8>, KmsError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let key = self.derive_key(&salt)?;
        let wrapped = self
            .cipher
            .encrypt(raw_dek, &key)
            .map_err(|_| KmsError::CryptoFailure)?;

        let mut blob = Vec::with_capacity(SALT_LEN + wrapped.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&wrapped);
        Ok(blob)
    }

    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>, KmsError> {
        if wrapped.len() < SALT_LEN {
            return Err(KmsError::MalformedBlob);
        }
        let (salt, rest) = wrapped.split_at(SALT_LEN);
        let key = self.derive_key(salt)?;
        self.cipher
            .decrypt(rest, &key)
            .map_err(|_| KmsError::CryptoFailure)
    }
}
