//! [`SecretsCore`]: the envelope encryption orchestrator.
//!
//! Ties together the [`crate::kms`] provider registry, the [`crate::dek`]
//! store and cache, and the [`crate::crypto`] payload cipher into the
//! `encrypt`/`decrypt`/`rotate_data_keys`/`re_encrypt_data_keys` surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};
use argon2::Argon2;
use common::{CoreError, DataKey, EncryptionOption, ProviderId};
use opentelemetry::metrics::Counter;
use opentelemetry::{global, KeyValue};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::crypto::{CipherError, PayloadCipher, KEY_LEN};
use crate::dek::{DataKeyCache, DekStore, Session, StoreError};
use crate::kms::{BackgroundProvider, ProviderRegistry};

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(name) => CoreError::DataKeyNotFound(name),
            other => CoreError::StoreFailure(other.to_string()),
        }
    }
}

impl From<CipherError> for CoreError {
    fn from(e: CipherError) -> Self {
        CoreError::CipherFailure(e.to_string())
    }
}

/// Construction-time configuration for [`SecretsCore`].
///
/// Mirrors `security.*` configuration keys — immutable once the core is
/// built; there is no process-wide mutable config singleton.
pub struct SecretsCoreConfig {
    /// Id of the provider new DEKs are wrapped under.
    pub current_provider_id: ProviderId,
    /// Feature flag `envelopeEncryption`. When `false`, all operations
    /// bypass the envelope path entirely.
    pub envelope_encryption_enabled: bool,
    /// `security.secret_key` — source material for the legacy cipher key.
    pub master_key: String,
    /// `security.encryption.data_keys_cache_ttl`.
    pub cache_ttl: Duration,
    /// `security.encryption.data_keys_cache_cleanup_interval`.
    pub cache_cleanup_interval: Duration,
}

/// Fixed, non-secret salt for deriving the legacy cipher key from the master
/// secret. The salt only needs to be a fixed input to Argon2id, not hidden.
const LEGACY_KEY_SALT: &[u8] = b"secrets-core.legacy-key.v1salt!";

/// The envelope encryption orchestrator.
///
/// Holds the "current DEK" per the last scope it was asked to encrypt for.
/// `current_data_key` is a single slot, not a map — matching the spec's
/// lazy-init-under-mutex design (see module docs for the single-flight
/// alternative the spec permits but does not require).
pub struct SecretsCore {
    providers: ProviderRegistry,
    current_provider_id: ProviderId,
    background_providers: Vec<Arc<dyn BackgroundProvider>>,
    store: Arc<dyn DekStore>,
    cipher: Arc<dyn PayloadCipher>,
    cache: DataKeyCache,
    cache_cleanup_interval: Duration,
    current_data_key: Mutex<Option<DataKey>>,
    envelope_encryption_enabled: bool,
    legacy_key: Vec<u8>,
    operations_counter: Counter<u64>,
}

impl SecretsCore {
    /// Construct a new core.
    ///
    /// `background_providers` is the subset of `providers` that also
    /// implements [`BackgroundProvider`] — callers pass the same `Arc` twice
    /// (once upcast into `providers`, once as its concrete/background form)
    /// since trait objects do not support runtime upcasting between
    /// unrelated trait bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if the legacy key cannot be derived from `config.master_key`.
    pub fn new(
        config: SecretsCoreConfig,
        providers: ProviderRegistry,
        background_providers: Vec<Arc<dyn BackgroundProvider>>,
        store: Arc<dyn DekStore>,
        cipher: Arc<dyn PayloadCipher>,
    ) -> Result<Self, CoreError> {
        let mut legacy_key = vec![0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(config.master_key.as_bytes(), LEGACY_KEY_SALT, &mut legacy_key)
            .map_err(|e| CoreError::CipherFailure(format!("legacy key derivation failed: {e}")))?;

        let meter = global::meter("secrets_core");
        let operations_counter = meter
            .u64_counter("secrets_core.operations")
            .with_description("Per-operation encrypt/decrypt outcomes")
            .init();

        let core = Self {
            providers,
            current_provider_id: config.current_provider_id,
            background_providers,
            store,
            cipher,
            cache: DataKeyCache::new(config.cache_ttl),
            cache_cleanup_interval: config.cache_cleanup_interval,
            current_data_key: Mutex::new(None),
            envelope_encryption_enabled: config.envelope_encryption_enabled,
            legacy_key,
            operations_counter,
        };
        core.record_startup_metrics(&meter);
        Ok(core)
    }

    fn record_startup_metrics(&self, meter: &opentelemetry::metrics::Meter) {
        meter
            .u64_observable_gauge("secrets_core.envelope_encryption_enabled")
            .with_callback({
                let enabled = self.envelope_encryption_enabled as u64;
                move |observer| observer.observe(enabled, &[])
            })
            .init();

        let mut kinds: HashMap<String, u64> = HashMap::new();
        for (id, _) in self.providers.iter() {
            *kinds.entry(id.kind().to_owned()).or_default() += 1;
        }
        meter
            .u64_observable_gauge("secrets_core.providers.count")
            .with_callback(move |observer| {
                for (kind, count) in &kinds {
                    observer.observe(*count, &[KeyValue::new("kind", kind.clone())]);
                }
            })
            .init();

        let current_kind = self.current_provider_id.kind().to_owned();
        meter
            .u64_observable_gauge("secrets_core.current_provider.count")
            .with_callback(move |observer| {
                observer.observe(1, &[KeyValue::new("kind", current_kind.clone())]);
            })
            .init();

        info!(
            envelope_encryption_enabled = self.envelope_encryption_enabled,
            current_provider = %self.current_provider_id,
            "secrets core initialized"
        );
    }

    fn record_operation(&self, operation: &'static str, success: bool) {
        self.operations_counter.add(
            1,
            &[
                KeyValue::new("operation", operation),
                KeyValue::new("success", success),
            ],
        );
    }

    /// Encrypt `payload`, naming the DEK with `opt()` as its scope.
    pub async fn encrypt(
        &self,
        payload: &[u8],
        opt: EncryptionOption,
        session: Option<&Session>,
    ) -> Result<Vec<u8>, CoreError> {
        let result = self.encrypt_inner(payload, opt, session).await;
        self.record_operation("encrypt", result.is_ok());
        result
    }

    async fn encrypt_inner(
        &self,
        payload: &[u8],
        opt: EncryptionOption,
        session: Option<&Session>,
    ) -> Result<Vec<u8>, CoreError> {
        if !self.envelope_encryption_enabled {
            return Ok(self.cipher.encrypt(payload, &self.legacy_key)?);
        }

        let scope = opt();
        let key_name = DataKey::key_name(&scope, self.current_provider_id.as_str());

        let dek = self.resolve_current_data_key(&key_name, &scope, session).await?;
        let raw = dek
            .decrypted_data
            .as_ref()
            .expect("resolved current DEK always carries decrypted_data");

        let ciphertext = self.cipher.encrypt(payload, raw)?;
        Ok(crate::dek::codec::encode(&dek.id, &ciphertext))
    }

    async fn resolve_current_data_key(
        &self,
        key_name: &str,
        scope: &str,
        session: Option<&Session>,
    ) -> Result<DataKey, CoreError> {
        {
            let guard = self.current_data_key.lock().await;
            if let Some(dek) = guard.as_ref() {
                if dek.name == key_name {
                    return Ok(dek.clone());
                }
            }
        }

        // Lock is released before any I/O: `get_current` and `new_data_key`
        // both touch the store and possibly KMS, and must not serialize
        // unrelated scopes behind this one.
        match self.store.get_current(key_name).await {
            Ok(record) => {
                let raw = self.unwrap_record(&record).await?;
                let mut dek = record;
                dek.decrypted_data = Some(raw.clone());
                self.cache.add(&dek.id, &raw);
                let mut guard = self.current_data_key.lock().await;
                *guard = Some(dek.clone());
                Ok(dek)
            }
            Err(StoreError::NotFound(_)) => {
                let dek = self.new_data_key(key_name, scope, session).await?;
                let mut guard = self.current_data_key.lock().await;
                *guard = Some(dek.clone());
                Ok(dek)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create, persist, and cache a fresh DEK under the current provider.
    async fn new_data_key(
        &self,
        name: &str,
        scope: &str,
        session: Option<&Session>,
    ) -> Result<DataKey, CoreError> {
        let mut raw = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut raw);

        let provider = self
            .providers
            .get(&self.current_provider_id)
            .ok_or_else(|| CoreError::ProviderNotConfigured(self.current_provider_id.to_string()))?;

        let encrypted_data = provider.encrypt(&raw).await.map_err(|e| CoreError::KmsFailure {
            provider: self.current_provider_id.to_string(),
            message: e.to_string(),
        })?;

        let now = chrono::Utc::now();
        let dek = DataKey {
            id: Uuid::new_v4().simple().to_string(),
            name: name.to_owned(),
            provider: self.current_provider_id.as_str().to_owned(),
            encrypted_data,
            decrypted_data: Some(raw.clone()),
            active: true,
            scope: scope.to_owned(),
            created_at: now,
            updated_at: now,
        };

        match session {
            Some(s) => self.store.create_within(dek.clone(), s).await?,
            None => self.store.create(dek.clone()).await?,
        }

        self.cache.add(&dek.id, &raw);
        Ok(dek)
    }

    /// Decrypt a framed envelope blob, or a legacy blob if envelope
    /// encryption is disabled or the frame marker is absent.
    pub async fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CoreError> {
        let result = self.decrypt_inner(payload).await;
        self.record_operation("decrypt", result.is_ok());
        result
    }

    async fn decrypt_inner(&self, payload: &[u8]) -> Result<Vec<u8>, CoreError> {
        if !self.envelope_encryption_enabled {
            return Ok(self.cipher.decrypt(payload, &self.legacy_key)?);
        }

        match crate::dek::codec::decode(payload)? {
            crate::dek::codec::Parsed::Legacy => Ok(self.cipher.decrypt(payload, &self.legacy_key)?),
            crate::dek::codec::Parsed::Envelope { id, ciphertext } => {
                let raw = self.data_key_by_id(&id).await?;
                Ok(self.cipher.decrypt(ciphertext, &raw)?)
            }
        }
    }

    async fn data_key_by_id(&self, id: &str) -> Result<Vec<u8>, CoreError> {
        if let Some(raw) = self.cache.get(id) {
            return Ok(raw);
        }

        let record = self.store.get_by_id(id).await?;
        let raw = self.unwrap_record(&record).await?;
        self.cache.add(id, &raw);
        Ok(raw)
    }

    async fn unwrap_record(&self, record: &DataKey) -> Result<Vec<u8>, CoreError> {
        let provider_id = ProviderId::from(record.provider.as_str());
        let provider = self
            .providers
            .get(&provider_id)
            .ok_or_else(|| CoreError::ProviderNotConfigured(provider_id.to_string()))?;

        provider
            .decrypt(&record.encrypted_data)
            .await
            .map_err(|e| CoreError::KmsFailure {
                provider: provider_id.to_string(),
                message: e.to_string(),
            })
    }

    /// Mark every DEK inactive. The cache is left untouched — historical
    /// ciphertexts remain decryptable.
    pub async fn rotate_data_keys(&self) -> Result<(), CoreError> {
        let mut guard = self.current_data_key.lock().await;
        self.store.disable_all().await?;
        *guard = None;
        Ok(())
    }

    /// Rewrap every stored DEK under the current provider and flush the cache.
    pub async fn re_encrypt_data_keys(&self) -> Result<(), CoreError> {
        self.store
            .re_encrypt_all(&self.providers, &self.current_provider_id)
            .await?;
        self.cache.flush();
        Ok(())
    }

    /// Encrypt every value in `values`, stopping and returning on first failure.
    pub async fn encrypt_many(
        &self,
        values: HashMap<String, Vec<u8>>,
        opt: EncryptionOption,
    ) -> Result<HashMap<String, Vec<u8>>, CoreError> {
        let mut out = HashMap::with_capacity(values.len());
        for (key, value) in values {
            let encrypted = self.encrypt(&value, opt.clone(), None).await?;
            out.insert(key, encrypted);
        }
        Ok(out)
    }

    /// Decrypt every value in `values`, stopping and returning on first failure.
    pub async fn decrypt_many(
        &self,
        values: HashMap<String, Vec<u8>>,
    ) -> Result<HashMap<String, Vec<u8>>, CoreError> {
        let mut out = HashMap::with_capacity(values.len());
        for (key, value) in values {
            let decrypted = self.decrypt(&value).await?;
            out.insert(key, decrypted);
        }
        Ok(out)
    }

    /// Decrypt `values[key]`, returning `fallback` if the key is absent or
    /// decryption fails. Errors are swallowed by design (see spec §7).
    pub async fn get_value_or_default(
        &self,
        values: &HashMap<String, Vec<u8>>,
        key: &str,
        fallback: Vec<u8>,
    ) -> Vec<u8> {
        match values.get(key) {
            Some(ciphertext) => self.decrypt(ciphertext).await.unwrap_or(fallback),
            None => fallback,
        }
    }

    /// Run the background loop: periodic cache eviction plus every
    /// background-capable provider's `run`, under a shared cancellation scope.
    pub async fn run(&self, cancellation: CancellationToken) {
        let mut tasks = Vec::new();
        for provider in &self.background_providers {
            let provider = provider.clone();
            let token = cancellation.clone();
            tasks.push(tokio::spawn(async move {
                provider.run(token).await;
            }));
        }

        let mut ticker = tokio::time::interval(self.cache_cleanup_interval);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {
                    self.cache.remove_expired();
                }
            }
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background provider task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dek::InMemoryDekStore;
    use crate::kms::local::LocalKmsProvider;
    use crate::kms::KmsProvider;
    use common::model::scope;

    fn build_core(provider_id: &str, master_password: &str) -> SecretsCore {
        let mut providers = ProviderRegistry::new();
        let provider = Arc::new(LocalKmsProvider::new(provider_id, master_password));
        providers.insert(provider.id(), provider as Arc<dyn crate::kms::KmsProvider>);

        SecretsCore::new(
            SecretsCoreConfig {
                current_provider_id: ProviderId::from(provider_id),
                envelope_encryption_enabled: true,
                master_key: "legacy-master-secret".into(),
                cache_ttl: Duration::from_secs(900),
                cache_cleanup_interval: Duration::from_secs(60),
            },
            providers,
            Vec::new(),
            Arc::new(InMemoryDekStore::new()),
            Arc::new(crate::crypto::AesGcmSivCipher),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn round_trip_basic() {
        let core = build_core("secretKey.v1", "test-key");
        let ciphertext = core.encrypt(b"hello", scope("settings"), None).await.unwrap();
        assert_eq!(ciphertext[0], b'#');
        let plaintext = core.decrypt(&ciphertext).await.unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[tokio::test]
    async fn legacy_decrypt_after_enabling_envelope() {
        let mut providers = ProviderRegistry::new();
        let provider = Arc::new(LocalKmsProvider::new("secretKey.v1", "pw"));
        providers.insert(provider.id(), provider.clone() as Arc<dyn crate::kms::KmsProvider>);

        let legacy_core = SecretsCore::new(
            SecretsCoreConfig {
                current_provider_id: ProviderId::from("secretKey.v1"),
                envelope_encryption_enabled: false,
                master_key: "shared-master".into(),
                cache_ttl: Duration::from_secs(900),
                cache_cleanup_interval: Duration::from_secs(60),
            },
            providers.clone(),
            Vec::new(),
            Arc::new(InMemoryDekStore::new()),
            Arc::new(crate::crypto::AesGcmSivCipher),
        )
        .unwrap();

        let legacy_ciphertext = legacy_core.encrypt(b"v1", scope("settings"), None).await.unwrap();
        assert_ne!(legacy_ciphertext.first(), Some(&b'#'));

        let envelope_core = SecretsCore::new(
            SecretsCoreConfig {
                current_provider_id: ProviderId::from("secretKey.v1"),
                envelope_encryption_enabled: true,
                master_key: "shared-master".into(),
                cache_ttl: Duration::from_secs(900),
                cache_cleanup_interval: Duration::from_secs(60),
            },
            providers,
            Vec::new(),
            Arc::new(InMemoryDekStore::new()),
            Arc::new(crate::crypto::AesGcmSivCipher),
        )
        .unwrap();

        let plaintext = envelope_core.decrypt(&legacy_ciphertext).await.unwrap();
        assert_eq!(plaintext, b"v1");
    }

    #[tokio::test]
    async fn rotation_changes_dek_id_but_keeps_old_decryptable() {
        let core = build_core("secretKey.v1", "test-key");
        let c1 = core.encrypt(b"a", scope("settings"), None).await.unwrap();
        core.rotate_data_keys().await.unwrap();
        let c2 = core.encrypt(b"b", scope("settings"), None).await.unwrap();

        assert_ne!(extract_id(&c1), extract_id(&c2));
        assert_eq!(core.decrypt(&c1).await.unwrap(), b"a");
        assert_eq!(core.decrypt(&c2).await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn re_encryption_migrates_provider_and_flushes_cache() {
        let mut providers = ProviderRegistry::new();
        let p1 = Arc::new(LocalKmsProvider::new("secretKey.v1", "pw1"));
        let p2 = Arc::new(LocalKmsProvider::new("secretKey.v2", "pw2"));
        providers.insert(p1.id(), p1.clone() as Arc<dyn crate::kms::KmsProvider>);
        providers.insert(p2.id(), p2.clone() as Arc<dyn crate::kms::KmsProvider>);

        let store = Arc::new(InMemoryDekStore::new());
        let core = SecretsCore::new(
            SecretsCoreConfig {
                current_provider_id: ProviderId::from("secretKey.v1"),
                envelope_encryption_enabled: true,
                master_key: "m".into(),
                cache_ttl: Duration::from_secs(900),
                cache_cleanup_interval: Duration::from_secs(60),
            },
            providers.clone(),
            Vec::new(),
            store.clone(),
            Arc::new(crate::crypto::AesGcmSivCipher),
        )
        .unwrap();

        let ciphertext = core.encrypt(b"payload", scope("settings"), None).await.unwrap();

        let core_v2 = SecretsCore::new(
            SecretsCoreConfig {
                current_provider_id: ProviderId::from("secretKey.v2"),
                envelope_encryption_enabled: true,
                master_key: "m".into(),
                cache_ttl: Duration::from_secs(900),
                cache_cleanup_interval: Duration::from_secs(60),
            },
            providers,
            Vec::new(),
            store.clone(),
            Arc::new(crate::crypto::AesGcmSivCipher),
        )
        .unwrap();

        core_v2.re_encrypt_data_keys().await.unwrap();

        let id = extract_id(&ciphertext);
        let record = store.get_by_id(&id).await.unwrap();
        assert_eq!(record.provider, "secretkey.v2");
        assert_eq!(core_v2.decrypt(&ciphertext).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn missing_provider_is_reported() {
        let store = Arc::new(InMemoryDekStore::new());
        let mut providers = ProviderRegistry::new();
        let provider = Arc::new(LocalKmsProvider::new("secretKey.v1", "pw"));
        providers.insert(provider.id(), provider as Arc<dyn crate::kms::KmsProvider>);

        let core = SecretsCore::new(
            SecretsCoreConfig {
                current_provider_id: ProviderId::from("secretKey.v1"),
                envelope_encryption_enabled: true,
                master_key: "pw".into(),
                cache_ttl: Duration::from_secs(900),
                cache_cleanup_interval: Duration::from_secs(60),
            },
            providers,
            Vec::new(),
            store.clone(),
            Arc::new(crate::crypto::AesGcmSivCipher),
        )
        .unwrap();
        let ciphertext = core.encrypt(b"x", scope("settings"), None).await.unwrap();

        // Same persisted DEK record, but this core never registered its provider.
        let orphaned = SecretsCore::new(
            SecretsCoreConfig {
                current_provider_id: ProviderId::from("secretKey.v1"),
                envelope_encryption_enabled: true,
                master_key: "pw".into(),
                cache_ttl: Duration::from_secs(900),
                cache_cleanup_interval: Duration::from_secs(60),
            },
            ProviderRegistry::new(),
            Vec::new(),
            store,
            Arc::new(crate::crypto::AesGcmSivCipher),
        )
        .unwrap();

        assert!(matches!(
            orphaned.decrypt(&ciphertext).await,
            Err(CoreError::ProviderNotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn malformed_inputs_are_rejected() {
        let core = build_core("secretKey.v1", "pw");
        assert!(matches!(core.decrypt(b"").await, Err(CoreError::EmptyPayload)));
        assert!(matches!(core.decrypt(b"#abc").await, Err(CoreError::MalformedFrame)));
        assert!(matches!(core.decrypt(b"#!!!#xx").await, Err(CoreError::MalformedFrame)));
    }

    fn extract_id(framed: &[u8]) -> String {
        match crate::dek::codec::decode(framed).unwrap() {
            crate::dek::codec::Parsed::Envelope { id, .. } => id,
            crate::dek::codec::Parsed::Legacy => panic!("expected envelope frame"),
        }
    }
}
