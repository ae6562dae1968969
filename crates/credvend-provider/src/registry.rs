//! Provider registry
//!
//! Maps credential types to provider factories and keeps one instantiated
//! [`ProviderSet`] per storage configuration. Instances are rebuilt only
//! when the configuration's fingerprint changes, so identity handles held by
//! providers live as long as the configuration does.

use crate::error::ProviderError;
use crate::provider::{CredentialProvider, ProviderFactory};
use crate::providers::{
    AdlsTokenProvider, AzureAccountKeyProvider, GcsTokenProvider, OssSecretKeyProvider,
    OssTokenProvider, S3SecretKeyProvider, S3TokenProvider,
};
use credvend_common::{CredentialType, StorageConfig, VendError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Providers instantiated for one storage configuration, in preference order
pub struct ProviderSet {
    providers: Vec<Arc<dyn CredentialProvider>>,
    fingerprint: String,
}

impl ProviderSet {
    /// Fingerprint of the storage configuration the providers were built from
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn get(&self, credential_type: &CredentialType) -> Option<&Arc<dyn CredentialProvider>> {
        self.providers
            .iter()
            .find(|p| p.credential_type() == credential_type)
    }

    /// Providers applicable to a request: only the requested type when one
    /// is given (empty when not configured), otherwise all in preference order.
    #[must_use]
    pub fn applicable(
        &self,
        requested: Option<&CredentialType>,
    ) -> Vec<Arc<dyn CredentialProvider>> {
        match requested {
            Some(ty) => self.get(ty).cloned().into_iter().collect(),
            None => self.providers.clone(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CredentialProvider>> {
        self.providers.iter()
    }
}


/// Registry of credential provider factories
pub struct ProviderRegistry {
    factories: RwLock<HashMap<CredentialType, ProviderFactory>>,
    instances: DashMap<String, Arc<ProviderSet>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            instances: DashMap::new(),
        }
    }

    /// Create a registry with the seven built-in providers
    #[must_use]
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(CredentialType::S3_TOKEN, |c| {
            Ok(Arc::new(S3TokenProvider::from_config(c)?))
        });
        registry.register(CredentialType::S3_SECRET_KEY, |c| {
            Ok(Arc::new(S3SecretKeyProvider::from_config(c)?))
        });
        registry.register(CredentialType::OSS_TOKEN, |c| {
            Ok(Arc::new(OssTokenProvider::from_config(c)?))
        });
        registry.register(CredentialType::OSS_SECRET_KEY, |c| {
            Ok(Arc::new(OssSecretKeyProvider::from_config(c)?))
        });
        registry.register(CredentialType::GCS_TOKEN, |c| {
            Ok(Arc::new(GcsTokenProvider::from_config(c)?))
        });
        registry.register(CredentialType::ADLS_TOKEN, |c| {
            Ok(Arc::new(AdlsTokenProvider::from_config(c)?))
        });
        registry.register(CredentialType::AZURE_ACCOUNT_KEY, |c| {
            Ok(Arc::new(AzureAccountKeyProvider::from_config(c)?))
        });
        registry
    }

    /// Register (or replace) the factory for a credential type
    ///
    /// Already instantiated provider sets are dropped so the next request
    /// picks up the new factory.
    pub fn register<F>(&self, credential_type: impl Into<CredentialType>, factory: F)
    where
        F: Fn(&StorageConfig) -> Result<Arc<dyn CredentialProvider>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        let credential_type = credential_type.into();
        tracing::debug!(credential_type = %credential_type, "registered credential provider");
        self.factories
            .write()
            .insert(credential_type, Arc::new(factory));
        self.instances.clear();
    }

    #[must_use]
    pub fn is_registered(&self, credential_type: &CredentialType) -> bool {
        self.factories.read().contains_key(credential_type)
    }

    /// Registered credential types, sorted
    #[must_use]
    pub fn registered_types(&self) -> Vec<CredentialType> {
        let mut types: Vec<_> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Providers for a storage configuration, in the configuration's
    /// preference order. Instantiated once per configuration fingerprint.
    pub fn providers_for(&self, config: &StorageConfig) -> Result<Arc<ProviderSet>, VendError> {
        let fingerprint = config.fingerprint();
        if let Some(existing) = self.instances.get(&config.id)
            && existing.fingerprint == fingerprint
        {
            return Ok(existing.clone());
        }

        match self.instances.entry(config.id.clone()) {
            Entry::Occupied(entry) if entry.get().fingerprint == fingerprint => {
                Ok(entry.get().clone())
            }
            entry => {
                let set = Arc::new(self.instantiate(config, fingerprint)?);
                tracing::info!(
                    storage = %config.id,
                    providers = set.len(),
                    "instantiated credential providers"
                );
                match entry {
                    Entry::Occupied(mut occupied) => {
                        occupied.insert(set.clone());
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(set.clone());
                    }
                }
                Ok(set)
            }
        }
    }

    /// Check at bootstrap that every declared type can be instantiated
    pub fn validate(&self, config: &StorageConfig) -> Result<(), VendError> {
        self.providers_for(config).map(|_| ())
    }

    /// Drop the instances held for a storage configuration
    pub fn forget(&self, storage_id: &str) {
        self.instances.remove(storage_id);
    }

    fn instantiate(
        &self,
        config: &StorageConfig,
        fingerprint: String,
    ) -> Result<ProviderSet, VendError> {
        let factories = self.factories.read();
        let mut providers = Vec::with_capacity(config.credential_types.len());

        for credential_type in &config.credential_types {
            let factory = factories
                .get(credential_type)
                .ok_or_else(|| VendError::NoProvider(credential_type.to_string()))?;
            let provider = factory(config).map_err(|e| {
                tracing::warn!(
                    storage = %config.id,
                    credential_type = %credential_type,
                    error = %e,
                    "credential provider is misconfigured"
                );
                VendError::ProviderMisconfigured {
                    credential_type: credential_type.to_string(),
                    storage: config.id.clone(),
                    detail: e.to_string(),
                }
            })?;
            providers.push(provider);
        }

        Ok(ProviderSet {
            providers,
            fingerprint,
        })
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MintContext;
    use async_trait::async_trait;
    use credvend_common::{CREDENTIAL_PROVIDERS_PROPERTY, Credential, StorageScope};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider(CredentialType);

    #[async_trait]
    impl CredentialProvider for FixedProvider {
        fn credential_type(&self) -> &CredentialType {
            &self.0
        }

        fn default_expiry_ms(&self) -> u64 {
            0
        }

        async fn mint(
            &self,
            _scope: &StorageScope,
            _context: &MintContext,
        ) -> Result<Credential, ProviderError> {
            Ok(Credential::new(self.0.clone(), 0, BTreeMap::new()))
        }
    }

    fn config(id: &str, pairs: &[(&str, &str)]) -> StorageConfig {
        StorageConfig::from_properties(
            id,
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    fn s3_config() -> StorageConfig {
        config(
            "demo.hadoop",
            &[
                (CREDENTIAL_PROVIDERS_PROPERTY, "s3-token,s3-secret-key"),
                ("s3-access-key-id", "AKID"),
                ("s3-secret-access-key", "SECRET"),
                ("s3-role-arn", "arn:aws:iam::123456789012:role/vend"),
            ],
        )
    }

    #[test]
    fn test_builtin_types() {
        let registry = ProviderRegistry::with_builtin();
        assert_eq!(registry.registered_types().len(), 7);
        assert!(registry.is_registered(&CredentialType::new("gcs-token")));
    }

    #[test]
    fn test_preference_order() {
        let registry = ProviderRegistry::with_builtin();
        let set = registry.providers_for(&s3_config()).unwrap();
        let types: Vec<_> = set.iter().map(|p| p.credential_type().to_string()).collect();
        assert_eq!(types, vec!["s3-token", "s3-secret-key"]);

        let requested = CredentialType::new("s3-secret-key");
        let applicable = set.applicable(Some(&requested));
        assert_eq!(applicable.len(), 1);
        assert_eq!(applicable[0].credential_type(), &requested);

        assert!(set.applicable(Some(&CredentialType::new("gcs-token"))).is_empty());
    }

    #[test]
    fn test_unregistered_type_is_no_provider() {
        let registry = ProviderRegistry::with_builtin();
        let config = config("demo.c", &[(CREDENTIAL_PROVIDERS_PROPERTY, "hdfs-kerberos")]);
        assert!(matches!(
            registry.providers_for(&config),
            Err(VendError::NoProvider(t)) if t == "hdfs-kerberos"
        ));
    }

    #[test]
    fn test_misconfigured_provider_is_configuration_error() {
        let registry = ProviderRegistry::with_builtin();
        let config = config("demo.c", &[(CREDENTIAL_PROVIDERS_PROPERTY, "s3-token")]);
        let err = registry.validate(&config).unwrap_err();
        assert!(matches!(err, VendError::ProviderMisconfigured { .. }));
        assert!(err.to_string().contains("s3-access-key-id"));
        assert!(!err.public_message().contains("s3-access-key-id"));
    }

    #[test]
    fn test_instantiated_once_per_fingerprint() {
        let registry = ProviderRegistry::new();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        registry.register("fixed", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixedProvider(CredentialType::new("fixed"))))
        });

        let a = config("demo.c", &[(CREDENTIAL_PROVIDERS_PROPERTY, "fixed")]);
        let first = registry.providers_for(&a).unwrap();
        let second = registry.providers_for(&a).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        let changed = config(
            "demo.c",
            &[(CREDENTIAL_PROVIDERS_PROPERTY, "fixed"), ("extra", "1")],
        );
        let rebuilt = registry.providers_for(&changed).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_ne!(first.fingerprint(), rebuilt.fingerprint());

        registry.forget("demo.c");
        registry.providers_for(&changed).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_empty_declaration() {
        let registry = ProviderRegistry::with_builtin();
        let set = registry.providers_for(&config("demo.c", &[])).unwrap();
        assert!(set.is_empty());
    }
}
