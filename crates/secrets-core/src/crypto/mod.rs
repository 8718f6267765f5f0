//! The symmetric payload cipher consumed by [`crate::core::SecretsCore`].
//!
//! This module is intentionally free of KMS and store dependencies — it
//! only knows how to turn `(plaintext, 16-byte key)` into an opaque blob and
//! back. The core treats the blob as the `ciphertext` half of the envelope
//! frame produced by [`crate::dek::codec`].

pub mod cipher;

pub use cipher::{CipherError, PayloadCipher, AesGcmSivCipher, KEY_LEN};
