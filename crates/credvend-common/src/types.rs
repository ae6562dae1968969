//! Core type definitions for credvend
//!
//! This module defines the data model shared by every component: metadata
//! object references, access permissions, storage scopes and the credentials
//! handed back to callers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Milliseconds since the Unix epoch, as used by `expireTimeInMs`.
#[must_use]
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

// =========== Metadata objects ===========

/// Kind of node in the catalog namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataObjectType {
    Metalake,
    Catalog,
    Schema,
    Table,
    Fileset,
    Topic,
    Column,
    Model,
    Role,
}

impl MetadataObjectType {
    /// Wire name of the type (lowercase)
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Metalake => "metalake",
            Self::Catalog => "catalog",
            Self::Schema => "schema",
            Self::Table => "table",
            Self::Fileset => "fileset",
            Self::Topic => "topic",
            Self::Column => "column",
            Self::Model => "model",
            Self::Role => "role",
        }
    }

    /// Number of dotted segments a full name of this type must have
    #[must_use]
    pub const fn name_arity(&self) -> usize {
        match self {
            Self::Metalake | Self::Catalog | Self::Role => 1,
            Self::Schema => 2,
            Self::Table | Self::Fileset | Self::Topic | Self::Model => 3,
            Self::Column => 4,
        }
    }

    /// Whether objects of this type can be backed by physical storage
    #[must_use]
    pub const fn has_storage_mapping(&self) -> bool {
        matches!(
            self,
            Self::Catalog | Self::Schema | Self::Table | Self::Fileset | Self::Model
        )
    }
}

impl fmt::Display for MetadataObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataObjectType {
    type Err = ObjectRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metalake" => Ok(Self::Metalake),
            "catalog" => Ok(Self::Catalog),
            "schema" => Ok(Self::Schema),
            "table" => Ok(Self::Table),
            "fileset" => Ok(Self::Fileset),
            "topic" => Ok(Self::Topic),
            "column" => Ok(Self::Column),
            "model" => Ok(Self::Model),
            "role" => Ok(Self::Role),
            _ => Err(ObjectRefError::UnknownType(s.to_string())),
        }
    }
}

/// Errors that can occur when building a metadata object reference
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectRefError {
    #[error("metalake name must not be empty")]
    EmptyMetalake,
    #[error("unknown metadata object type: {0}")]
    UnknownType(String),
    #[error("metadata object name contains an empty segment")]
    EmptySegment,
    #[error("{object_type} name must have {expected} segment(s), got {actual}")]
    Arity {
        object_type: MetadataObjectType,
        expected: usize,
        actual: usize,
    },
}

/// Identifies a logical node of the catalog, scoped under a metalake
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawObjectRef")]
pub struct MetadataObjectRef {
    metalake: String,
    object_type: MetadataObjectType,
    full_name: Vec<String>,
}

/// Unvalidated wire form; deserialization goes through `MetadataObjectRef::new`
#[derive(Deserialize)]
struct RawObjectRef {
    metalake: String,
    object_type: MetadataObjectType,
    full_name: Vec<String>,
}

impl TryFrom<RawObjectRef> for MetadataObjectRef {
    type Error = ObjectRefError;

    fn try_from(raw: RawObjectRef) -> Result<Self, Self::Error> {
        Self::new(raw.metalake, raw.object_type, raw.full_name)
    }
}

impl MetadataObjectRef {
    /// Create a new reference, validating the name against the type
    pub fn new(
        metalake: impl Into<String>,
        object_type: MetadataObjectType,
        full_name: Vec<String>,
    ) -> Result<Self, ObjectRefError> {
        let metalake = metalake.into();
        if metalake.trim().is_empty() {
            return Err(ObjectRefError::EmptyMetalake);
        }
        if full_name.iter().any(|s| s.trim().is_empty()) {
            return Err(ObjectRefError::EmptySegment);
        }
        if full_name.len() != object_type.name_arity() {
            return Err(ObjectRefError::Arity {
                object_type,
                expected: object_type.name_arity(),
                actual: full_name.len(),
            });
        }

        Ok(Self {
            metalake,
            object_type,
            full_name,
        })
    }

    /// Parse from the wire form: a type name and a dotted full name
    pub fn parse(metalake: &str, object_type: &str, dotted_name: &str) -> Result<Self, ObjectRefError> {
        let object_type: MetadataObjectType = object_type.parse()?;
        let full_name = dotted_name.split('.').map(str::to_string).collect();
        Self::new(metalake, object_type, full_name)
    }

    #[must_use]
    pub fn metalake(&self) -> &str {
        &self.metalake
    }

    #[must_use]
    pub const fn object_type(&self) -> MetadataObjectType {
        self.object_type
    }

    /// Name segments, outermost first
    #[must_use]
    pub fn full_name(&self) -> &[String] {
        &self.full_name
    }

    /// Dotted full name (e.g. `catalog.schema.table`)
    #[must_use]
    pub fn dotted_name(&self) -> String {
        self.full_name.join(".")
    }

    /// Last segment of the full name
    #[must_use]
    pub fn name(&self) -> &str {
        self.full_name.last().map_or("", String::as_str)
    }

    /// Catalog segment, for every type living under a catalog
    #[must_use]
    pub fn catalog(&self) -> Option<&str> {
        match self.object_type {
            MetadataObjectType::Metalake | MetadataObjectType::Role => None,
            _ => self.full_name.first().map(String::as_str),
        }
    }

    /// Schema segment, for every type living under a schema
    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        if self.full_name.len() >= 2 && self.catalog().is_some() {
            Some(&self.full_name[1])
        } else {
            None
        }
    }

    /// Identity of the object inside its metalake (`type:dotted.name`)
    #[must_use]
    pub fn object_key(&self) -> String {
        format!("{}:{}", self.object_type, self.dotted_name())
    }
}

impl fmt::Debug for MetadataObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MetadataObjectRef({}/{}:{})",
            self.metalake,
            self.object_type,
            self.dotted_name()
        )
    }
}

impl fmt::Display for MetadataObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.object_type, self.metalake, self.dotted_name())
    }
}

// =========== Access ===========

/// Permission level a credential authorizes (`Read < ReadWrite`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    #[default]
    Read,
    ReadWrite,
}

impl Permission {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::ReadWrite => "READ_WRITE",
        }
    }

    #[must_use]
    pub const fn allows_write(&self) -> bool {
        matches!(self, Self::ReadWrite)
    }

    /// Intersection of two grants
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        self.min(other)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "READ" => Ok(Self::Read),
            "READ_WRITE" => Ok(Self::ReadWrite),
            other => Err(format!("unknown permission: {other}")),
        }
    }
}

/// Pre-validated identity of the caller, produced by the authorization layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessContext {
    /// Principal name (used for audit and upstream session naming)
    pub principal: String,
    /// Highest permission the principal holds on the requested object
    pub granted: Permission,
}

impl AccessContext {
    pub fn new(principal: impl Into<String>, granted: Permission) -> Self {
        Self {
            principal: principal.into(),
            granted,
        }
    }

    /// Context used when no identity was attached upstream
    #[must_use]
    pub fn anonymous(granted: Permission) -> Self {
        Self::new("anonymous", granted)
    }
}

// =========== Storage scope ===========

/// The storage locations and permission level a credential must cover
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageScope {
    locations: Vec<String>,
    permission: Permission,
}

impl StorageScope {
    /// Create a scope; locations are normalised, sorted and deduplicated by prefix
    pub fn new<I, S>(locations: I, permission: Permission) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = locations
            .into_iter()
            .map(|l| normalize_location(l.as_ref()))
            .filter(|l| !l.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();

        // Sorted order puts every prefix before the paths it covers.
        let mut kept: Vec<String> = Vec::with_capacity(normalized.len());
        for location in normalized {
            if !kept.iter().any(|p| is_path_prefix(p, &location)) {
                kept.push(location);
            }
        }

        Self {
            locations: kept,
            permission,
        }
    }

    #[must_use]
    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    #[must_use]
    pub const fn permission(&self) -> Permission {
        self.permission
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Same locations, permission narrowed to at most `permission`
    #[must_use]
    pub fn restrict(&self, permission: Permission) -> Self {
        Self {
            locations: self.locations.clone(),
            permission: self.permission.intersect(permission),
        }
    }

    /// Whether `location` lies inside one of the scope's prefixes
    #[must_use]
    pub fn covers(&self, location: &str) -> bool {
        let location = normalize_location(location);
        self.locations.iter().any(|p| is_path_prefix(p, &location))
    }

    /// Stable lowercase hex SHA-256 over permission and locations
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.permission.as_str().as_bytes());
        for location in &self.locations {
            hasher.update([0u8]);
            hasher.update(location.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for StorageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageScope")
            .field("locations", &self.locations)
            .field("permission", &self.permission)
            .finish()
    }
}

/// Trim whitespace and trailing slashes (but keep `scheme://`)
fn normalize_location(location: &str) -> String {
    let trimmed = location.trim();
    let stripped = trimmed.trim_end_matches('/');
    if stripped.ends_with(':') {
        // "s3://" style root; keep the scheme separator intact
        trimmed.to_string()
    } else {
        stripped.to_string()
    }
}

/// `prefix` covers `path` when equal or followed by a `/` boundary
fn is_path_prefix(prefix: &str, path: &str) -> bool {
    path == prefix
        || (path.starts_with(prefix)
            && (prefix.ends_with('/') || path.as_bytes().get(prefix.len()) == Some(&b'/')))
}

// =========== Credentials ===========

/// Credential type identifier (open, extensible set)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display("{_0}")]
pub struct CredentialType(String);

impl CredentialType {
    pub const S3_TOKEN: &'static str = "s3-token";
    pub const S3_SECRET_KEY: &'static str = "s3-secret-key";
    pub const GCS_TOKEN: &'static str = "gcs-token";
    pub const ADLS_TOKEN: &'static str = "adls-token";
    pub const AZURE_ACCOUNT_KEY: &'static str = "azure-account-key";
    pub const OSS_TOKEN: &'static str = "oss-token";
    pub const OSS_SECRET_KEY: &'static str = "oss-secret-key";

    /// Create a credential type; the identifier is trimmed and lowercased
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialType({:?})", self.0)
    }
}

impl From<&str> for CredentialType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for CredentialType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for CredentialType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A minted credential. Immutable once minted; replaced, never mutated.
///
/// `expire_time_in_ms == 0` means the credential never expires.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    credential_type: CredentialType,
    expire_time_in_ms: u64,
    credential_info: BTreeMap<String, String>,
}

impl Credential {
    pub fn new(
        credential_type: CredentialType,
        expire_time_in_ms: u64,
        credential_info: BTreeMap<String, String>,
    ) -> Self {
        Self {
            credential_type,
            expire_time_in_ms,
            credential_info,
        }
    }

    #[must_use]
    pub const fn credential_type(&self) -> &CredentialType {
        &self.credential_type
    }

    #[must_use]
    pub const fn expire_time_in_ms(&self) -> u64 {
        self.expire_time_in_ms
    }

    #[must_use]
    pub const fn credential_info(&self) -> &BTreeMap<String, String> {
        &self.credential_info
    }

    #[must_use]
    pub fn info(&self, key: &str) -> Option<&str> {
        self.credential_info.get(key).map(String::as_str)
    }

    #[must_use]
    pub const fn never_expires(&self) -> bool {
        self.expire_time_in_ms == 0
    }

    /// Expired at `now_ms`; credentials that never expire are never expired
    #[must_use]
    pub const fn is_expired_at(&self, now_ms: u64) -> bool {
        !self.never_expires() && self.expire_time_in_ms <= now_ms
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, &str> = self
            .credential_info
            .keys()
            .map(|k| (k.as_str(), "[REDACTED]"))
            .collect();
        f.debug_struct("Credential")
            .field("credential_type", &self.credential_type)
            .field("expire_time_in_ms", &self.expire_time_in_ms)
            .field("credential_info", &redacted)
            .finish()
    }
}
