//! Credential provider trait and types
//!
//! A provider knows how to mint one credential type for one storage
//! backend. Providers never cache credentials; they may hold long-lived
//! identity handles (an HTTP client, a service account token) for the
//! lifetime of the process.

use crate::error::ProviderError;
use async_trait::async_trait;
use credvend_common::{Credential, CredentialType, StorageConfig, StorageScope};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Timeout applied to every call against a cloud identity service
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-request information passed to a mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintContext {
    /// Principal the credential is minted for
    pub principal: String,
}

impl MintContext {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
        }
    }

    /// Session name usable by cloud STS APIs (`[\w+=,.@-]`, at most 64 chars)
    #[must_use]
    pub fn session_name(&self) -> String {
        let sanitized: String = self
            .principal
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let mut name = format!("credvend-{sanitized}");
        name.truncate(64);
        name
    }
}

/// Trait for credential providers
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Credential type this provider mints
    fn credential_type(&self) -> &CredentialType;

    /// Lifetime of minted credentials in ms; 0 for credentials that never expire
    fn default_expiry_ms(&self) -> u64;

    /// Mint a credential covering `scope`
    async fn mint(
        &self,
        scope: &StorageScope,
        context: &MintContext,
    ) -> Result<Credential, ProviderError>;
}

/// Builds a provider instance from a storage configuration
pub type ProviderFactory =
    Arc<dyn Fn(&StorageConfig) -> Result<Arc<dyn CredentialProvider>, ProviderError> + Send + Sync>;

/// Typed credential fields that flatten into the wire `credentialInfo` map
pub trait CredentialInfo {
    fn into_info(self) -> BTreeMap<String, String>;
}

/// Read a required, non-blank property
pub(crate) fn required_property(config: &StorageConfig, key: &str) -> Result<String, ProviderError> {
    config
        .property(key)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::MissingProperty(key.to_string()))
}

/// Read an optional lifetime property in seconds
pub(crate) fn expire_in_secs(
    config: &StorageConfig,
    key: &str,
    default: u64,
) -> Result<u64, ProviderError> {
    match config.property(key) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(ProviderError::configuration(format!(
                "{key} must be a positive integer, got {value}"
            ))),
        },
    }
}

/// Shared HTTP client for identity service calls
pub(crate) fn http_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .build()
        .map_err(|e| ProviderError::configuration(e.to_string()))
}

/// Token-style credentials must carry a real expiry
pub(crate) fn token_expiry(expire_time_in_ms: u64, now_ms: u64) -> Result<u64, ProviderError> {
    if expire_time_in_ms <= now_ms {
        return Err(ProviderError::invalid_response(format!(
            "token expiry {expire_time_in_ms} is not in the future"
        )));
    }
    Ok(expire_time_in_ms)
}
