//! `secrets-core-demo` — minimal binary demonstrating the startup sequence
//! a consuming service follows to wire up [`secrets_core::SecretsCore`].
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (OTEL traces + metrics).
//! 3. Construct the configured KMS providers and register them.
//! 4. Construct the DEK store, cache, and [`SecretsCore`].
//! 5. Spawn the background loop (cache eviction + provider liveness probes).
//! 6. Encrypt and decrypt a sample payload to prove the wiring works, then
//!    wait for a shutdown signal.

use std::sync::Arc;

use anyhow::Result;
use common::model::scope;
use secrets_core::config::Config;
use secrets_core::core::{SecretsCore, SecretsCoreConfig};
use secrets_core::crypto::AesGcmSivCipher;
use secrets_core::dek::InMemoryDekStore;
use secrets_core::kms::local::LocalKmsProvider;
use secrets_core::kms::ProviderRegistry;
use secrets_core::telemetry;
use secrets_core::ProviderId;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    let meter_provider = telemetry::init_telemetry(&cfg.otel_exporter_otlp_endpoint, &cfg.log_level)?;
    info!(version = env!("CARGO_PKG_VERSION"), "secrets-core-demo starting");

    // -----------------------------------------------------------------------
    // 3. KMS providers
    // -----------------------------------------------------------------------
    let provider_id = ProviderId::from(cfg.encryption_provider.as_str());
    let mut providers = ProviderRegistry::new();
    let local_provider = Arc::new(LocalKmsProvider::new(provider_id.clone(), cfg.secret_key.clone()));
    providers.insert(provider_id.clone(), local_provider);

    // -----------------------------------------------------------------------
    // 4. Core
    // -----------------------------------------------------------------------
    let store = Arc::new(InMemoryDekStore::new());
    let core = Arc::new(SecretsCore::new(
        SecretsCoreConfig {
            current_provider_id: provider_id,
            envelope_encryption_enabled: cfg.envelope_encryption_enabled,
            master_key: cfg.secret_key.clone(),
            cache_ttl: cfg.data_keys_cache_ttl(),
            cache_cleanup_interval: cfg.data_keys_cache_cleanup_interval(),
        },
        providers,
        Vec::new(),
        store,
        Arc::new(AesGcmSivCipher),
    )?);

    // -----------------------------------------------------------------------
    // 5. Background loop
    // -----------------------------------------------------------------------
    let cancellation = CancellationToken::new();
    let background = tokio::spawn({
        let core = core.clone();
        let cancellation = cancellation.clone();
        async move { core.run(cancellation).await }
    });

    // -----------------------------------------------------------------------
    // 6. Smoke-test round trip, then wait for shutdown
    // -----------------------------------------------------------------------
    let ciphertext = core.encrypt(b"hello from secrets-core", scope("demo"), None).await?;
    let plaintext = core.decrypt(&ciphertext).await?;
    info!(plaintext = %String::from_utf8_lossy(&plaintext), "round trip succeeded");

    tokio::signal::ctrl_c().await?;
    cancellation.cancel();
    background.await?;

    meter_provider.shutdown()?;
    Ok(())
}
