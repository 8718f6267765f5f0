//! Configuration loading and validation for `secrets-core`.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Validated `secrets-core` configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// `security.encryption_provider` — id of the KMS used to wrap new DEKs.
    #[serde(default = "default_encryption_provider")]
    pub encryption_provider: String,

    /// `security.secret_key` — master key for legacy encryption and the
    /// default local provider's passphrase. **Required.**
    pub secret_key: String,

    /// `security.encryption.data_keys_cache_ttl`, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub data_keys_cache_ttl_secs: u64,

    /// `security.encryption.data_keys_cache_cleanup_interval`, in seconds.
    #[serde(default = "default_cache_cleanup_interval_secs")]
    pub data_keys_cache_cleanup_interval_secs: u64,

    /// Feature flag `envelopeEncryption`. When `false`, all operations
    /// bypass the envelope path and use the legacy cipher directly.
    #[serde(default = "default_envelope_encryption_enabled")]
    pub envelope_encryption_enabled: bool,

    /// KMS key id for the cloud provider. Required only when
    /// `encryption_provider` (or any configured provider) targets `cloud.aws`.
    #[serde(default)]
    pub kms_key_id: Option<String>,

    /// OTLP endpoint for traces and metrics. **Required.**
    pub otel_exporter_otlp_endpoint: String,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_encryption_provider() -> String {
    "secretKey.v1".into()
}
fn default_cache_ttl_secs() -> u64 {
    15 * 60
}
fn default_cache_cleanup_interval_secs() -> u64 {
    60
}
fn default_envelope_encryption_enabled() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// `data_keys_cache_ttl_secs` as a [`Duration`].
    pub fn data_keys_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.data_keys_cache_ttl_secs)
    }

    /// `data_keys_cache_cleanup_interval_secs` as a [`Duration`].
    pub fn data_keys_cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.data_keys_cache_cleanup_interval_secs)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.encryption_provider, "SECURITY_ENCRYPTION_PROVIDER")?;
        ensure_non_empty(&self.secret_key, "SECURITY_SECRET_KEY")?;
        ensure_non_empty(&self.otel_exporter_otlp_endpoint, "OTEL_EXPORTER_OTLP_ENDPOINT")?;

        if self.data_keys_cache_ttl_secs == 0 {
            anyhow::bail!("SECURITY_ENCRYPTION_DATA_KEYS_CACHE_TTL_SECS must be > 0");
        }
        if self.data_keys_cache_cleanup_interval_secs == 0 {
            anyhow::bail!("SECURITY_ENCRYPTION_DATA_KEYS_CACHE_CLEANUP_INTERVAL_SECS must be > 0");
        }
        if self.encryption_provider.to_lowercase().starts_with("cloud.") && self.kms_key_id.is_none() {
            anyhow::bail!("KMS_KEY_ID is required when encryption_provider targets a cloud KMS");
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            encryption_provider: default_encryption_provider(),
            secret_key: "test-key".into(),
            data_keys_cache_ttl_secs: default_cache_ttl_secs(),
            data_keys_cache_cleanup_interval_secs: default_cache_cleanup_interval_secs(),
            envelope_encryption_enabled: default_envelope_encryption_enabled(),
            kms_key_id: None,
            otel_exporter_otlp_endpoint: "http://127.0.0.1:4317".into(),
            log_level: default_log_level(),
        }
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_encryption_provider(), "secretKey.v1");
        assert_eq!(default_cache_ttl_secs(), 900);
        assert_eq!(default_cache_cleanup_interval_secs(), 60);
        assert!(default_envelope_encryption_enabled());
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_secret_key() {
        let mut cfg = base_config();
        cfg.secret_key = "".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_requires_kms_key_id_for_cloud_provider() {
        let mut cfg = base_config();
        cfg.encryption_provider = "cloud.aws".into();
        assert!(cfg.validate().is_err());
        cfg.kms_key_id = Some("arn:aws:kms:...".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_ttl() {
        let mut cfg = base_config();
        cfg.data_keys_cache_ttl_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
