//! Pluggable key-wrapping providers.
//!
//! A [`KmsProvider`] wraps and unwraps raw DEK bytes; it never sees plaintext
//! payload data, only the 16-byte key. [`ProviderRegistry`] is the lookup the
//! core and the DEK store use to resolve a [`ProviderId`] to a live provider
//! instance. Some providers (e.g. [`cloud::CloudKmsProvider`]) also implement
//! [`BackgroundProvider`] to run a liveness probe under the core's
//! cancellation group.

pub mod cloud;
pub mod local;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ProviderId;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors produced by a [`KmsProvider`].
#[derive(Debug, Error)]
pub enum KmsError {
    /// The wrapped blob is malformed (too short, bad header, etc).
    #[error("malformed key-wrap blob")]
    MalformedBlob,

    /// The underlying AEAD or KDF operation failed.
    #[error("key-wrap cryptographic operation failed")]
    CryptoFailure,

    /// The remote KMS call failed.
    #[error("remote KMS call failed: {0}")]
    RemoteFailure(String),
}

/// Wraps and unwraps raw DEK bytes under a provider-specific key.
///
/// Implementations own their own wire format for `encrypted_data`; callers
/// never inspect it, only pass it back to the same provider that produced it.
#[async_trait]
pub trait KmsProvider: Send + Sync {
    /// Stable id this provider registers under, e.g. `secretKey.v1` or `cloud.aws`.
    fn id(&self) -> ProviderId;

    /// Wrap `raw_dek` (the plaintext DEK bytes).
    async fn encrypt(&self, raw_dek: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Unwrap a blob produced by [`KmsProvider::encrypt`].
    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>, KmsError>;
}

/// Optional capability for providers backed by a remote service: run a
/// liveness probe until `cancellation` fires.
#[async_trait]
pub trait BackgroundProvider: KmsProvider {
    /// Run until `cancellation` is triggered. Errors are logged by the
    /// caller, not propagated — a probe failure does not stop the core.
    async fn run(&self, cancellation: CancellationToken);
}

/// Lookup table from [`ProviderId`] to a live [`KmsProvider`].
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn KmsProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under `id`, replacing any existing entry.
    pub fn insert(&mut self, id: ProviderId, provider: Arc<dyn KmsProvider>) {
        self.providers.insert(id, provider);
    }

    /// Look up a provider by id.
    pub fn get(&self, id: &ProviderId) -> Option<Arc<dyn KmsProvider>> {
        self.providers.get(id).cloned()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry has no providers.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Iterate over all registered providers.
    pub fn iter(&self) -> impl Iterator<Item = (&ProviderId, &Arc<dyn KmsProvider>)> {
        self.providers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::local::LocalKmsProvider;

    #[test]
    fn registry_roundtrips_lookup() {
        let mut registry = ProviderRegistry::new();
        let provider = Arc::new(LocalKmsProvider::new("secretkey.v1", "pw"));
        registry.insert(provider.id(), provider.clone() as Arc<dyn KmsProvider>);

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&ProviderId::from("secretKey.v1")).is_some());
        assert!(registry.get(&ProviderId::from("unknown")).is_none());
    }
}
