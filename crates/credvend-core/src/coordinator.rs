//! Vending coordinator
//!
//! Entry point of the subsystem: resolves the object's scope, picks the
//! applicable providers and fetches or mints one credential per provider
//! through the cache, in the storage's preference order.

use crate::cache::{CacheKey, CacheStatsSnapshot, CredentialCache};
use crate::lookup::MetadataLookup;
use crate::observer::VendingObserver;
use crate::scope::{ResolvedScope, ScopeResolver};
use credvend_common::config::CacheConfig;
use credvend_common::{
    AccessContext, Credential, CredentialType, MetadataObjectRef, MintFailureKind, Result,
    VendError, current_time_ms,
};
use credvend_provider::{MintContext, ProviderRegistry};
use futures::future::try_join_all;
use std::sync::Arc;

/// Coordinates scope resolution, provider selection and caching
pub struct VendingCoordinator {
    resolver: ScopeResolver,
    registry: Arc<ProviderRegistry>,
    cache: Arc<CredentialCache>,
}

impl VendingCoordinator {
    /// Create a coordinator with a cache built from `cache_config`
    pub fn new(
        lookup: Arc<dyn MetadataLookup>,
        registry: Arc<ProviderRegistry>,
        cache_config: &CacheConfig,
        observer: Arc<dyn VendingObserver>,
    ) -> Self {
        let cache = CredentialCache::new(cache_config).with_observer(observer);
        Self::with_cache(lookup, registry, Arc::new(cache))
    }

    /// Create a coordinator sharing an existing cache
    pub fn with_cache(
        lookup: Arc<dyn MetadataLookup>,
        registry: Arc<ProviderRegistry>,
        cache: Arc<CredentialCache>,
    ) -> Self {
        Self {
            resolver: ScopeResolver::new(lookup),
            registry,
            cache,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Vend credentials for an object.
    ///
    /// With `requested` set, only that credential type is returned and
    /// [`VendError::UnsupportedCredentialType`] is raised when the object's
    /// storage does not declare it. Otherwise one credential per declared
    /// type is returned, most preferred first. Objects without storage yield
    /// an empty list.
    pub async fn vend(
        &self,
        object: &MetadataObjectRef,
        requested: Option<&CredentialType>,
        access: &AccessContext,
    ) -> Result<Vec<Credential>> {
        let Some(ResolvedScope { storage, scope }) = self.resolver.resolve(object).await? else {
            tracing::debug!(object = %object, "object has no storage, nothing to vend");
            return Ok(Vec::new());
        };
        let scope = scope.restrict(access.granted);

        let providers = self.registry.providers_for(&storage)?;
        let applicable = providers.applicable(requested);
        if applicable.is_empty() {
            return match requested {
                Some(ty) => Err(VendError::unsupported_credential_type(ty, object)),
                None => Ok(Vec::new()),
            };
        }

        let object_key = object.object_key();
        let context = MintContext::new(access.principal.clone());
        let fetches = applicable.into_iter().map(|provider| {
            let key = CacheKey::new(
                object.metalake(),
                object_key.clone(),
                provider.credential_type().clone(),
                providers.fingerprint(),
                &scope,
            );
            self.cache
                .get_or_mint(key, provider, scope.clone(), context.clone())
        });
        let credentials = try_join_all(fetches).await?;

        let now = current_time_ms();
        if let Some(expired) = credentials.iter().find(|c| c.is_expired_at(now)) {
            return Err(VendError::CredentialUnavailable {
                credential_type: expired.credential_type().to_string(),
                reason: MintFailureKind::Internal,
            });
        }

        tracing::debug!(
            object = %object,
            principal = %access.principal,
            permission = %scope.permission(),
            count = credentials.len(),
            "vended credentials"
        );
        Ok(credentials)
    }

    /// Drop cached credentials of a deleted or altered object
    pub fn invalidate_object(&self, object: &MetadataObjectRef) -> usize {
        self.cache
            .invalidate_object(object.metalake(), &object.object_key())
    }

    /// Drop cached credentials of a deleted metalake
    pub fn invalidate_metalake(&self, metalake: &str) -> usize {
        self.cache.invalidate_metalake(metalake)
    }

    /// Drop expired credentials
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }
}
