//! Storage configuration attached to catalogs
//!
//! A catalog declares which credential types it can vend through the
//! `credential-providers` property, in order of preference, and carries the
//! provider settings (keys, roles, endpoints) in the rest of its properties.

use crate::types::CredentialType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Catalog property listing the credential types to vend, comma separated
pub const CREDENTIAL_PROVIDERS_PROPERTY: &str = "credential-providers";

/// Provider-relevant configuration of one storage backend
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Identifier of the owner (usually `metalake.catalog`)
    pub id: String,
    /// Declared credential types, first is preferred
    pub credential_types: Vec<CredentialType>,
    /// Provider properties (secrets included)
    pub properties: BTreeMap<String, String>,
}

impl StorageConfig {
    /// Build from catalog properties, reading the declared credential types
    /// out of [`CREDENTIAL_PROVIDERS_PROPERTY`].
    pub fn from_properties(id: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        let credential_types = properties
            .get(CREDENTIAL_PROVIDERS_PROPERTY)
            .map(|v| parse_credential_types(v))
            .unwrap_or_default();

        Self {
            id: id.into(),
            credential_types,
            properties,
        }
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    #[must_use]
    pub fn declares(&self, credential_type: &CredentialType) -> bool {
        self.credential_types.contains(credential_type)
    }

    /// Hex SHA-256 of the id and every property; changes whenever the
    /// provider configuration changes.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        for (key, value) in &self.properties {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("id", &self.id)
            .field("credential_types", &self.credential_types)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Split a comma list of credential types, dropping blanks and duplicates
fn parse_credential_types(value: &str) -> Vec<CredentialType> {
    let mut types: Vec<CredentialType> = Vec::new();
    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let ty = CredentialType::new(name);
        if !types.contains(&ty) {
            types.push(ty);
        }
    }
    types
}
