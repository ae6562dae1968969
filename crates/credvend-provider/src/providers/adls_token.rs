//! `adls-token`: service SAS tokens signed locally with the account key
//!
//! No network round-trip: the SAS is an HMAC-SHA256 over the canonical
//! string-to-sign, keyed with the decoded storage account key.

use crate::error::ProviderError;
use crate::location::StorageLocation;
use crate::provider::{
    CredentialInfo, CredentialProvider, MintContext, expire_in_secs, required_property,
};
use crate::signing::{hmac_sha256, percent_encode};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use credvend_common::{Credential, CredentialType, Permission, StorageConfig, StorageScope};
use std::collections::BTreeMap;

pub const ACCOUNT_NAME: &str = "azure-storage-account-name";
pub const ACCOUNT_KEY: &str = "azure-storage-account-key";
pub const TOKEN_EXPIRE_IN_SECS: &str = "adls-token-expire-in-secs";

pub const SAS_TOKEN: &str = "adls-sas-token";

const DEFAULT_EXPIRE_IN_SECS: u64 = 3600;
const SAS_VERSION: &str = "2020-12-06";
const ADLS_SCHEMES: &[&str] = &["abfs", "abfss", "wasb", "wasbs"];
/// Start time is backdated to tolerate clock skew on the storage side
const START_SKEW_SECS: i64 = 300;

/// Fields of an `adls-token` credential
#[derive(Debug, Clone)]
pub struct AdlsTokenInfo {
    pub account_name: String,
    pub sas_token: String,
}

impl CredentialInfo for AdlsTokenInfo {
    fn into_info(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ACCOUNT_NAME.to_string(), self.account_name),
            (SAS_TOKEN.to_string(), self.sas_token),
        ])
    }
}

pub struct AdlsTokenProvider {
    credential_type: CredentialType,
    account_name: String,
    account_key: Vec<u8>,
    expire_in_secs: u64,
}

/// What a SAS grants access to
#[derive(Debug, Clone, PartialEq, Eq)]
struct SasTarget {
    container: String,
    /// Directory path for a directory-scoped SAS; `None` for the container
    directory: Option<String>,
}

impl AdlsTokenProvider {
    pub fn from_config(config: &StorageConfig) -> Result<Self, ProviderError> {
        let account_name = required_property(config, ACCOUNT_NAME)?;
        let account_key = BASE64
            .decode(required_property(config, ACCOUNT_KEY)?.trim())
            .map_err(|_| ProviderError::configuration(format!("{ACCOUNT_KEY} is not valid base64")))?;

        Ok(Self {
            credential_type: CredentialType::new(CredentialType::ADLS_TOKEN),
            account_name,
            account_key,
            expire_in_secs: expire_in_secs(config, TOKEN_EXPIRE_IN_SECS, DEFAULT_EXPIRE_IN_SECS)?,
        })
    }

    /// Resolve the single container, and the single directory within it,
    /// the scope lives in.
    fn target(&self, scope: &StorageScope) -> Result<SasTarget, ProviderError> {
        let mut parsed = Vec::with_capacity(scope.locations().len());
        for location in scope.locations() {
            let loc = StorageLocation::parse(location)?;
            loc.expect_scheme(ADLS_SCHEMES)?;
            if loc.account.as_deref() != Some(self.account_name.as_str()) {
                return Err(ProviderError::unsupported_scope(format!(
                    "{location} is not in storage account {}",
                    self.account_name
                )));
            }
            parsed.push(loc);
        }

        let first = parsed
            .first()
            .ok_or_else(|| ProviderError::unsupported_scope("scope has no locations"))?;
        if parsed.iter().any(|l| l.bucket != first.bucket) {
            return Err(ProviderError::unsupported_scope(
                "adls-token cannot cover more than one container",
            ));
        }

        // A container SAS only when the scope is the container root; several
        // directories cannot share one directory SAS.
        let directory = if parsed.iter().any(|l| l.prefix.is_empty()) {
            None
        } else {
            let mut dirs: Vec<&str> = parsed.iter().map(|l| l.prefix.as_str()).collect();
            dirs.sort_unstable();
            dirs.dedup();
            match dirs.as_slice() {
                [only] => Some((*only).to_string()),
                _ => {
                    return Err(ProviderError::unsupported_scope(
                        "adls-token cannot cover more than one directory",
                    ));
                }
            }
        };
        Ok(SasTarget {
            container: first.bucket.clone(),
            directory,
        })
    }

    /// Build the SAS query string
    fn sas_token(
        &self,
        target: &SasTarget,
        permission: Permission,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> String {
        let permissions = match permission {
            Permission::Read => "rl",
            Permission::ReadWrite => "racwdl",
        };
        let start = start.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let expiry = expiry.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let (resource, canonical, depth) = match &target.directory {
            Some(dir) => (
                "d",
                format!("/blob/{}/{}/{}", self.account_name, target.container, dir),
                Some(dir.split('/').filter(|s| !s.is_empty()).count()),
            ),
            None => (
                "c",
                format!("/blob/{}/{}", self.account_name, target.container),
                None,
            ),
        };

        // permissions, start, expiry, resource, identifier, ip, protocol,
        // version, resource type, snapshot time, encryption scope, then the
        // five response header overrides
        let string_to_sign = [
            permissions,
            start.as_str(),
            expiry.as_str(),
            canonical.as_str(),
            "",
            "",
            "https",
            SAS_VERSION,
            resource,
            "",
            "",
            "",
            "",
            "",
            "",
            "",
        ]
        .join("\n");
        let signature = BASE64.encode(hmac_sha256(&self.account_key, string_to_sign.as_bytes()));

        let mut token = format!(
            "sv={SAS_VERSION}&sr={resource}&sp={permissions}&st={}&se={}&spr=https",
            percent_encode(&start),
            percent_encode(&expiry)
        );
        if let Some(depth) = depth {
            token.push_str(&format!("&sdd={depth}"));
        }
        token.push_str("&sig=");
        token.push_str(&percent_encode(&signature));
        token
    }
}

#[async_trait]
impl CredentialProvider for AdlsTokenProvider {
    fn credential_type(&self) -> &CredentialType {
        &self.credential_type
    }

    fn default_expiry_ms(&self) -> u64 {
        self.expire_in_secs * 1000
    }

    async fn mint(
        &self,
        scope: &StorageScope,
        _context: &MintContext,
    ) -> Result<Credential, ProviderError> {
        let target = self.target(scope)?;
        let now = Utc::now();
        let lifetime = i64::try_from(self.expire_in_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                ProviderError::configuration(format!("{TOKEN_EXPIRE_IN_SECS} is too large"))
            })?;
        let expiry = now + lifetime;
        let sas_token = self.sas_token(
            &target,
            scope.permission(),
            now - Duration::seconds(START_SKEW_SECS),
            expiry,
        );

        // SAS times have second precision; report the truncated expiry
        let expire_ms = u64::try_from(expiry.timestamp()).unwrap_or_default() * 1000;

        let info = AdlsTokenInfo {
            account_name: self.account_name.clone(),
            sas_token,
        };
        Ok(Credential::new(
            self.credential_type.clone(),
            expire_ms,
            info.into_info(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use credvend_common::current_time_ms;

    fn provider() -> AdlsTokenProvider {
        let config = StorageConfig::from_properties(
            "demo.adls",
            BTreeMap::from([
                (ACCOUNT_NAME.to_string(), "acct".to_string()),
                (ACCOUNT_KEY.to_string(), BASE64.encode(b"account-key-bytes")),
            ]),
        );
        AdlsTokenProvider::from_config(&config).unwrap()
    }

    #[test]
    fn test_invalid_key_is_configuration_error() {
        let config = StorageConfig::from_properties(
            "demo.adls",
            BTreeMap::from([
                (ACCOUNT_NAME.to_string(), "acct".to_string()),
                (ACCOUNT_KEY.to_string(), "not base64!".to_string()),
            ]),
        );
        assert!(matches!(
            AdlsTokenProvider::from_config(&config),
            Err(ProviderError::Configuration(_))
        ));
    }

    #[test]
    fn test_target_single_directory() {
        let scope = StorageScope::new(
            ["abfss://data@acct.dfs.core.windows.net/warehouse/t1"],
            Permission::Read,
        );
        let target = provider().target(&scope).unwrap();
        assert_eq!(target.container, "data");
        assert_eq!(target.directory.as_deref(), Some("warehouse/t1"));
    }

    #[test]
    fn test_target_rejects_multiple_containers_and_foreign_accounts() {
        let scope = StorageScope::new(
            [
                "abfss://a@acct.dfs.core.windows.net/x",
                "abfss://b@acct.dfs.core.windows.net/y",
            ],
            Permission::Read,
        );
        assert!(provider().target(&scope).is_err());

        let scope = StorageScope::new(["abfss://a@other.dfs.core.windows.net/x"], Permission::Read);
        assert!(provider().target(&scope).is_err());
    }

    #[test]
    fn test_target_rejects_multiple_directories() {
        let scope = StorageScope::new(
            [
                "abfss://data@acct.dfs.core.windows.net/warehouse/t1/data",
                "abfss://data@acct.dfs.core.windows.net/external/t1/meta",
            ],
            Permission::ReadWrite,
        );
        assert!(matches!(
            provider().target(&scope),
            Err(ProviderError::UnsupportedScope(_))
        ));
    }

    #[test]
    fn test_target_container_root() {
        let scope = StorageScope::new(["abfss://data@acct.dfs.core.windows.net/"], Permission::Read);
        let target = provider().target(&scope).unwrap();
        assert_eq!(target.container, "data");
        assert_eq!(target.directory, None);
    }

    #[tokio::test]
    async fn test_mint_two_directories_never_signs_container() {
        let scope = StorageScope::new(
            [
                "abfss://data@acct.dfs.core.windows.net/warehouse/t1/data",
                "abfss://data@acct.dfs.core.windows.net/external/t1/meta",
            ],
            Permission::ReadWrite,
        );
        assert!(
            provider()
                .mint(&scope, &MintContext::new("carol"))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_sas_token_shape() {
        let provider = provider();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let expiry = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let target = SasTarget {
            container: "data".into(),
            directory: Some("warehouse/t1".into()),
        };

        let read = provider.sas_token(&target, Permission::Read, start, expiry);
        assert!(read.starts_with("sv=2020-12-06&sr=d&sp=rl&st=2024-01-01T00%3A00%3A00Z"));
        assert!(read.contains("&sdd=2&"));
        assert!(read.contains("&sig="));

        let write = provider.sas_token(&target, Permission::ReadWrite, start, expiry);
        assert!(write.contains("sp=racwdl"));
        assert_ne!(read, write);
    }

    #[tokio::test]
    async fn test_mint() {
        let scope = StorageScope::new(["abfss://data@acct.dfs.core.windows.net/t"], Permission::Read);
        let credential = provider()
            .mint(&scope, &MintContext::new("carol"))
            .await
            .unwrap();
        assert_eq!(credential.credential_type(), "adls-token");
        assert_eq!(credential.info(ACCOUNT_NAME), Some("acct"));
        assert!(credential.info(SAS_TOKEN).unwrap().contains("sr=d"));
        assert!(credential.expire_time_in_ms() > current_time_ms());
    }
}
