//! Configuration types for credvend
//!
//! This module defines the configuration structures shared by the server and
//! the library crates. Every section has a [`Default`] so a partial file (or
//! no file at all) still produces a runnable configuration.

use crate::types::Permission;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Root configuration for credvend
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VendingConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Credential cache configuration
    pub cache: CacheConfig,
    /// Access defaults
    pub access: AccessConfig,
    /// Metalakes served by the bundled in-memory catalog
    pub metalakes: Vec<MetalakeConfig>,
}

/// HTTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address of the REST API
    pub listen: SocketAddr,
    /// Listen address of the Prometheus exporter (disabled when unset)
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8090)),
            metrics_listen: None,
        }
    }
}

/// Credential cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Refresh a credential this long before it expires (ms)
    pub refresh_skew_ms: u64,
    /// Upper bound on cached entries; least recently used are evicted
    pub max_entries: usize,
    /// Interval of the background purge of expired entries (seconds)
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_skew_ms: 5 * 60 * 1000,
            max_entries: 10_000,
            sweep_interval_secs: 60,
        }
    }
}

/// Access defaults
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Permission granted when a request carries no identity context
    pub anonymous_permission: Permission,
}

/// A tenant and its catalogs
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetalakeConfig {
    pub name: String,
    pub catalogs: Vec<CatalogConfig>,
}

/// A catalog: the owner of storage configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub name: String,
    /// Root storage location; objects without a location inherit from here
    pub location: Option<String>,
    /// Catalog properties, including `credential-providers` and provider settings
    pub properties: BTreeMap<String, String>,
    /// Only vend read credentials for anything in this catalog
    pub read_only: bool,
    pub schemas: Vec<SchemaConfig>,
}

/// A schema inside a catalog
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub name: String,
    /// Defaults to `<catalog location>/<schema name>`
    pub location: Option<String>,
    pub read_only: bool,
    pub tables: Vec<ObjectConfig>,
    pub filesets: Vec<ObjectConfig>,
    pub models: Vec<ObjectConfig>,
    /// Topics have no storage mapping; listed for existence checks only
    pub topics: Vec<String>,
}

/// A leaf object (table, fileset or model)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    pub name: String,
    /// Defaults to `<schema location>/<object name>`
    pub locations: Vec<String>,
    pub read_only: bool,
    /// Column names (tables only)
    pub columns: Vec<String>,
}

impl ObjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locations = locations.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}
