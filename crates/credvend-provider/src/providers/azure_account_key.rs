//! `azure-account-key`: the catalog's static storage account key

use super::adls_token::{ACCOUNT_KEY, ACCOUNT_NAME};
use crate::error::ProviderError;
use crate::provider::{CredentialInfo, CredentialProvider, MintContext, required_property};
use async_trait::async_trait;
use credvend_common::{Credential, CredentialType, StorageConfig, StorageScope};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct AzureAccountKeyInfo {
    pub account_name: String,
    pub account_key: String,
}

impl CredentialInfo for AzureAccountKeyInfo {
    fn into_info(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ACCOUNT_NAME.to_string(), self.account_name),
            (ACCOUNT_KEY.to_string(), self.account_key),
        ])
    }
}

pub struct AzureAccountKeyProvider {
    credential_type: CredentialType,
    info: AzureAccountKeyInfo,
}

impl AzureAccountKeyProvider {
    pub fn from_config(config: &StorageConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            credential_type: CredentialType::new(CredentialType::AZURE_ACCOUNT_KEY),
            info: AzureAccountKeyInfo {
                account_name: required_property(config, ACCOUNT_NAME)?,
                account_key: required_property(config, ACCOUNT_KEY)?,
            },
        })
    }
}

#[async_trait]
impl CredentialProvider for AzureAccountKeyProvider {
    fn credential_type(&self) -> &CredentialType {
        &self.credential_type
    }

    fn default_expiry_ms(&self) -> u64 {
        0
    }

    async fn mint(
        &self,
        _scope: &StorageScope,
        _context: &MintContext,
    ) -> Result<Credential, ProviderError> {
        Ok(Credential::new(
            self.credential_type.clone(),
            0,
            self.info.clone().into_info(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credvend_common::Permission;

    #[tokio::test]
    async fn test_mint() {
        let config = StorageConfig::from_properties(
            "demo.adls",
            BTreeMap::from([
                (ACCOUNT_NAME.to_string(), "acct".to_string()),
                (ACCOUNT_KEY.to_string(), "a2V5".to_string()),
            ]),
        );
        let credential = AzureAccountKeyProvider::from_config(&config)
            .unwrap()
            .mint(
                &StorageScope::new(["abfss://c@acct.dfs.core.windows.net/t"], Permission::Read),
                &MintContext::new("carol"),
            )
            .await
            .unwrap();
        assert_eq!(credential.expire_time_in_ms(), 0);
        assert_eq!(credential.info(ACCOUNT_NAME), Some("acct"));
        assert_eq!(credential.info(ACCOUNT_KEY), Some("a2V5"));
    }
}
