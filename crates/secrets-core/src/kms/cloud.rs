//! AWS KMS-backed key-wrapping provider.
//!
//! Grounded in the original AWS SDK client bundle: KMS is the only AWS
//! service this provider talks to, using the same `aws-config` credential
//! chain and `aws_sdk_kms::primitives::Blob` plumbing as the envelope's
//! original DEK-fetch path, generalized into the pluggable [`super::KmsProvider`]
//! contract (one `kms_key_id` per provider instance rather than one fixed key
//! for the whole process).

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::primitives::Blob;
use common::ProviderId;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{BackgroundProvider, KmsError, KmsProvider};

/// Wraps DEK bytes via an AWS KMS `Encrypt`/`Decrypt` key, identified by `kms_key_id`.
#[derive(Clone)]
pub struct CloudKmsProvider {
    id: ProviderId,
    client: aws_sdk_kms::Client,
    kms_key_id: String,
    liveness_probe_interval: Duration,
}

impl CloudKmsProvider {
    /// Create a provider wrapping DEKs under `kms_key_id` via `client`.
    pub fn new(id: impl Into<ProviderId>, client: aws_sdk_kms::Client, kms_key_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client,
            kms_key_id: kms_key_id.into(),
            liveness_probe_interval: Duration::from_secs(300),
        }
    }

    /// Override the [`BackgroundProvider::run`] liveness probe cadence.
    pub fn with_liveness_probe_interval(mut self, interval: Duration) -> Self {
        self.liveness_probe_interval = interval;
        self
    }

    /// Build a provider via the standard AWS credential chain (environment,
    /// shared config/credentials files, or an attached IAM role) — no vsock
    /// proxy or endpoint override, since this core has no enclave networking
    /// constraint.
    pub async fn from_env(id: impl Into<ProviderId>, kms_key_id: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = aws_sdk_kms::Client::new(&config);
        Self::new(id, client, kms_key_id)
    }
}

#[async_trait]
impl KmsProvider for CloudKmsProvider {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    async fn encrypt(&self, raw_dek: &[u8]) -> Result<Vec<u8>, KmsError> {
        let resp = self
            .client
            .encrypt()
            .key_id(&self.kms_key_id)
            .plaintext(Blob::new(raw_dek.to_vec()))
            .send()
            .await
            .map_err(|e| KmsError::RemoteFailure(e.to_string()))?;

        resp.ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| KmsError::RemoteFailure("KMS encrypt response contained no ciphertext".into()))
    }

    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>, KmsError> {
        let resp = self
            .client
            .decrypt()
            .key_id(&self.kms_key_id)
            .ciphertext_blob(Blob::new(wrapped.to_vec()))
            .send()
            .await
            .map_err(|e| KmsError::RemoteFailure(e.to_string()))?;

        resp.plaintext()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| KmsError::RemoteFailure("KMS decrypt response contained no plaintext".into()))
    }
}

#[async_trait]
impl BackgroundProvider for CloudKmsProvider {
    /// Periodically call `DescribeKey` until cancelled, logging on failure.
    ///
    /// This is a liveness probe, not a retry loop — a failed probe does not
    /// affect in-flight `encrypt`/`decrypt` calls, it only surfaces
    /// misconfiguration (a revoked key, a missing IAM grant) in logs early.
    async fn run(&self, cancellation: CancellationToken) {
        let mut ticker = time::interval(self.liveness_probe_interval);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    debug!(provider = %self.id, "cloud KMS liveness probe stopping");
                    return;
                }
                _ = ticker.tick() => {
                    match self.client.describe_key().key_id(&self.kms_key_id).send().await {
                        Ok(_) => debug!(provider = %self.id, key_id = %self.kms_key_id, "KMS key reachable"),
                        Err(e) => warn!(provider = %self.id, key_id = %self.kms_key_id, error = %e, "KMS liveness probe failed"),
                    }
                }
            }
        }
    }
}
