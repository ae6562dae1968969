//! `oss-secret-key`: the catalog's static OSS key pair

use super::oss_token::{ACCESS_KEY_ID, SECRET_ACCESS_KEY};
use crate::error::ProviderError;
use crate::provider::{CredentialInfo, CredentialProvider, MintContext, required_property};
use async_trait::async_trait;
use credvend_common::{Credential, CredentialType, StorageConfig, StorageScope};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct OssSecretKeyInfo {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl CredentialInfo for OssSecretKeyInfo {
    fn into_info(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ACCESS_KEY_ID.to_string(), self.access_key_id),
            (SECRET_ACCESS_KEY.to_string(), self.secret_access_key),
        ])
    }
}

pub struct OssSecretKeyProvider {
    credential_type: CredentialType,
    info: OssSecretKeyInfo,
}

impl OssSecretKeyProvider {
    pub fn from_config(config: &StorageConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            credential_type: CredentialType::new(CredentialType::OSS_SECRET_KEY),
            info: OssSecretKeyInfo {
                access_key_id: required_property(config, ACCESS_KEY_ID)?,
                secret_access_key: required_property(config, SECRET_ACCESS_KEY)?,
            },
        })
    }
}

#[async_trait]
impl CredentialProvider for OssSecretKeyProvider {
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
