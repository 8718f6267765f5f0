//! Top-level error type raised by the envelope encryption core.

use thiserror::Error;

/// Errors raised by the envelope encryption core.
///
/// Every error that crosses a cryptographic boundary (KMS, the persisted
/// DEK store, the payload cipher) is logged with structured fields at the
/// call site — provider id and/or key id where applicable — and never
/// includes key material.
#[derive(Debug, Error)]
pub enum CoreError {
    /// `decrypt` was called with a zero-length payload.
    #[error("payload is empty")]
    EmptyPayload,

    /// The envelope frame is malformed: no closing `#`, or invalid base64.
    #[error("malformed envelope frame")]
    MalformedFrame,

    /// No active DEK exists for the requested name.
    #[error("no active data key for {0}")]
    DataKeyNotFound(String),

    /// A DEK references a KMS provider id that is not in the registry.
    #[error("provider not configured: {0}")]
    ProviderNotConfigured(String),

    /// A KMS wrap/unwrap call failed.
    #[error("kms failure (provider {provider}): {message}")]
    KmsFailure {
        /// The provider id the failing call was made against.
        provider: String,
        /// Human-readable failure detail. Never contains key material.
        message: String,
    },

    /// The symmetric payload cipher failed (e.g. AEAD tag mismatch).
    #[error("cipher failure: {0}")]
    CipherFailure(String),

    /// The persisted DEK store returned an error.
    #[error("store failure: {0}")]
    StoreFailure(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_do_not_require_key_material() {
        let e = CoreError::KmsFailure {
            provider: "cloud.aws".into(),
            message: "access denied".into(),
        };
        assert!(e.to_string().contains("cloud.aws"));
        assert!(e.to_string().contains("access denied"));
    }

    #[test]
    fn data_key_not_found_carries_name() {
        let e = CoreError::DataKeyNotFound("settings/secretKey.v1".into());
        assert!(e.to_string().contains("settings/secretKey.v1"));
    }
}
