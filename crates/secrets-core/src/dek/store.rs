//! [`DekStore`]: persistence of DEK records, keyed by id and by `(name, active)`.
//!
//! The store itself is an external collaborator per the core's scope — this
//! module defines the trait the core consumes and ships [`InMemoryDekStore`],
//! a `tokio::sync::RwLock`-backed reference implementation generalized from
//! the teacher's single-slot `RwLock<Option<DekBytes>>` `DekStore` into a
//! full multi-record store with the at-most-one-active-per-name invariant
//! enforced under the write lock.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{DataKey, ProviderId};
use thiserror::Error;
use tracing::warn;

use crate::kms::{KmsProvider, ProviderRegistry};

/// Errors produced by the DEK store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No active DEK exists for the requested name, or no record exists for the id.
    #[error("no matching data key: {0}")]
    NotFound(String),

    /// A DEK with this id already exists.
    #[error("data key id already exists: {0}")]
    DuplicateId(String),

    /// Re-encryption failed for at least one record.
    #[error("re-encryption failed for {failed} of {total} data keys")]
    ReEncryptPartialFailure { failed: usize, total: usize },
}

/// Opaque marker for a caller-supplied transaction/session.
///
/// The concrete transaction handle is the persistence layer's concern; the
/// core only threads it through so callers that need transactional
/// `create`+subsequent-writes can enlist the DEK insert in the same unit of
/// work. `()` stands in for "no session" in tests and the in-memory store.
pub type Session = ();

/// Persistence of [`DataKey`] records.
///
/// Implementations MUST enforce that at most one record per `name` has
/// `active == true` — either atomically inside `create`, or by construction
/// (the caller checked `get_current` first and the store serializes
/// concurrent creates for the same name).
#[async_trait]
pub trait DekStore: Send + Sync {
    /// Persist a new record.
    async fn create(&self, dek: DataKey) -> Result<(), StoreError>;

    /// Persist a new record enlisted in `session`.
    async fn create_within(&self, dek: DataKey, session: &Session) -> Result<(), StoreError> {
        let _ = session;
        self.create(dek).await
    }

    /// Fetch a record by id. `decrypted_data` is never populated here.
    async fn get_by_id(&self, id: &str) -> Result<DataKey, StoreError>;

    /// Fetch the active record for `name`.
    async fn get_current(&self, name: &str) -> Result<DataKey, StoreError>;

    /// Mark every record `active = false`.
    async fn disable_all(&self) -> Result<(), StoreError>;

    /// Rewrap every record under `current_provider_id`, unwrapping each
    /// with its own recorded provider first.
    ///
    /// Individual record failures are logged and skipped; the call only
    /// reports success if every record succeeded (partial progress is
    /// retained either way).
    async fn re_encrypt_all(
        &self,
        providers: &ProviderRegistry,
        current_provider_id: &ProviderId,
    ) -> Result<(), StoreError>;
}

/// In-memory [`DekStore`] reference implementation.
///
/// Suitable as the default store for tests and for embedding the core in a
/// process that does not (yet) have a durable DEK table — the records live
/// only as long as the process does.
#[derive(Default)]
pub struct InMemoryDekStore {
    by_id: tokio::sync::RwLock<HashMap<String, DataKey>>,
}

impl InMemoryDekStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DekStore for InMemoryDekStore {
    async fn create(&self, dek: DataKey) -> Result<(), StoreError> {
        let mut by_id = self.by_id.write().await;
        if by_id.contains_key(&dek.id) {
            return Err(StoreError::DuplicateId(dek.id));
        }
        if dek.active {
            for existing in by_id.values_mut() {
                if existing.name == dek.name && existing.active {
                    existing.active = false;
                }
            }
        }
        by_id.insert(dek.id.clone(), dek);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<DataKey, StoreError> {
        self.by_id
            .read()
            .await
            .get(id)
            .cloned()
            .map(|mut dek| {
                dek.decrypted_data = None;
                dek
            })
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))
    }

    async fn get_current(&self, name: &str) -> Result<DataKey, StoreError> {
        self.by_id
            .read()
            .await
            .values()
            .find(|dek| dek.name == name && dek.active)
            .cloned()
            .map(|mut dek| {
                dek.decrypted_data = None;
                dek
            })
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))
    }

    async fn disable_all(&self) -> Result<(), StoreError> {
        let mut by_id = self.by_id.write().await;
        for dek in by_id.values_mut() {
            dek.active = false;
        }
        Ok(())
    }

    async fn re_encrypt_all(
        &self,
        providers: &ProviderRegistry,
        current_provider_id: &ProviderId,
    ) -> Result<(), StoreError> {
        let mut by_id = self.by_id.write().await;
        let total = by_id.len();
        let mut failed = 0usize;
        let current = providers.get(current_provider_id);

        for dek in by_id.values_mut() {
            match re_encrypt_one(dek, providers, current_provider_id, current.as_ref()).await {
                Ok(()) => {}
                Err(e) => {
                    warn!(data_key_id = %dek.id, error = %e, "re-encryption failed for data key; skipping");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(StoreError::ReEncryptPartialFailure { failed, total });
        }
        Ok(())
    }
}

async fn re_encrypt_one(
    dek: &mut DataKey,
    providers: &ProviderRegistry,
    current_provider_id: &ProviderId,
    current_provider: Option<&Arc<dyn KmsProvider>>,
) -> Result<(), StoreError> {
    let source_provider_id = ProviderId::from(dek.provider.as_str());
    let source = providers
        .get(&source_provider_id)
        .ok_or_else(|| StoreError::NotFound(format!("provider {source_provider_id} not configured")))?;
    let raw = source
        .decrypt(&dek.encrypted_data)
        .await
        .map_err(|e| StoreError::NotFound(e.to_string()))?;

    let target = current_provider
        .ok_or_else(|| StoreError::NotFound(format!("provider {current_provider_id} not configured")))?;
    let rewrapped = target
        .encrypt(&raw)
        .await
        .map_err(|e| StoreError::NotFound(e.to_string()))?;

    dek.encrypted_data = rewrapped;
    dek.provider = current_provider_id.as_str().to_owned();
    Ok(())
}
