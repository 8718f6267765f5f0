//! The persisted DEK record and the small value types around it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Data Encryption Key record as persisted by a [`DekStore`](crate) implementation.
///
/// `decrypted_data`, when present, holds the raw 16-byte key. It is never
/// serialized — stores persist everything else and reconstruct the raw
/// bytes only by unwrapping `encrypted_data` through the owning KMS provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataKey {
    /// ASCII, ≤ 32 chars, unique across all DEKs.
    pub id: String,
    /// `<scope>/<provider-id>`.
    pub name: String,
    /// Id of the KMS provider that wrapped this DEK.
    pub provider: String,
    /// Wrapped DEK bytes; length is provider-specific.
    pub encrypted_data: Vec<u8>,
    /// Raw DEK bytes. In-memory only, 16 bytes when present.
    #[serde(skip)]
    pub decrypted_data: Option<Vec<u8>>,
    /// At most one record with a given `name` has `active == true`.
    pub active: bool,
    /// The encryption-option scope this DEK was created for.
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataKey {
    /// `name` qualified by `scope` and `provider`, as used by `DekStore::get_current`.
    pub fn key_name(scope: &str, provider: &str) -> String {
        format!("{scope}/{provider}")
    }
}

/// A canonicalized string identifying a configured KMS provider instance.
///
/// Normalization trims whitespace and lowercases the value; `kind()` is the
/// first dot-separated segment (`cloud.aws` → `cloud`), used for the
/// `providers.<kind>.count` / `current_provider.<kind>.count` metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(String);

impl ProviderId {
    /// Normalize `raw` (trim + lowercase) into a [`ProviderId`].
    pub fn normalize(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    /// The first dot-separated segment, e.g. `cloud.aws` → `cloud`.
    pub fn kind(&self) -> &str {
        self.0.split('.').next().unwrap_or(self.0.as_str())
    }

    /// The full canonical id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}

impl From<String> for ProviderId {
    fn from(raw: String) -> Self {
        Self::normalize(raw)
    }
}

/// A deferred function returning the scope string a DEK is named with.
///
/// Callers typically pass a closure that captures a request-scoped value;
/// [`scope`] wraps a plain string for the common case.
pub type EncryptionOption = Arc<dyn Fn() -> String + Send + Sync>;

/// Build an [`EncryptionOption`] that always returns `value`.
pub fn scope(value: impl Into<String>) -> EncryptionOption {
    let value = value.into();
    Arc::new(move || value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_normalizes_case_and_whitespace() {
        let a = ProviderId::normalize("  Cloud.AWS \n");
        assert_eq!(a.as_str(), "cloud.aws");
    }

    #[test]
    fn provider_id_kind_splits_on_first_dot() {
        assert_eq!(ProviderId::normalize("cloud.aws").kind(), "cloud");
        assert_eq!(ProviderId::normalize("secretKey.v1").kind(), "secretkey");
        assert_eq!(ProviderId::normalize("local").kind(), "local");
    }

    #[test]
    fn key_name_joins_scope_and_provider() {
        assert_eq!(
            DataKey::key_name("settings", "secretKey.v1"),
            "settings/secretKey.v1"
        );
    }

    #[test]
    fn scope_option_returns_captured_value() {
        let opt = scope("alerting");
        assert_eq!(opt(), "alerting");
        assert_eq!(opt(), "alerting");
    }
}
