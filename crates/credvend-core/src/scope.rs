//! Scope resolution
//!
//! Turns a metadata object reference into the storage locations and
//! permission a credential must cover, plus the storage configuration that
//! decides which providers mint it.

use crate::lookup::MetadataLookup;
use credvend_common::{MetadataObjectRef, Result, StorageConfig, StorageScope, VendError};
use std::sync::Arc;

/// Storage configuration and scope of a resolved object
#[derive(Debug, Clone)]
pub struct ResolvedScope {
    pub storage: Arc<StorageConfig>,
    pub scope: StorageScope,
}

/// Resolves metadata objects to storage scopes
pub struct ScopeResolver {
    lookup: Arc<dyn MetadataLookup>,
}

impl ScopeResolver {
    pub fn new(lookup: Arc<dyn MetadataLookup>) -> Self {
        Self { lookup }
    }

    /// Resolve an object.
    ///
    /// Returns `Ok(None)` when the object exists but is not backed by any
    /// storage. Types without a storage mapping (metalake, role, topic,
    /// column) are rejected with [`VendError::UnsupportedObjectType`] once
    /// their existence is confirmed.
    pub async fn resolve(&self, object: &MetadataObjectRef) -> Result<Option<ResolvedScope>> {
        let storage = self.lookup.lookup(object).await?;

        if !object.object_type().has_storage_mapping() {
            return Err(VendError::UnsupportedObjectType(object.object_type().to_string()));
        }

        Ok(storage.and_then(|s| {
            let scope = StorageScope::new(&s.locations, s.capability);
            if scope.is_empty() {
                None
            } else {
                Some(ResolvedScope {
                    storage: s.storage,
                    scope,
                })
            }
        }))
    }
}
