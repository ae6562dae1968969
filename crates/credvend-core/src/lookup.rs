//! Metadata lookup collaborator
//!
//! The credential core never owns catalog metadata. It asks a
//! [`MetadataLookup`] whether an object exists and which storage backs it.
//! [`InMemoryCatalog`] is the bundled implementation, built from the
//! `metalakes` section of the configuration.

use async_trait::async_trait;
use credvend_common::config::{CatalogConfig, MetalakeConfig, ObjectConfig, SchemaConfig};
use credvend_common::{
    MetadataObjectRef, MetadataObjectType, Permission, Result, StorageConfig, VendError,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Storage backing a metadata object
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    /// Provider configuration of the owning catalog
    pub storage: Arc<StorageConfig>,
    /// Every location holding the object's data and metadata files
    pub locations: Vec<String>,
    /// Highest permission the object itself allows
    pub capability: Permission,
}

/// Trait for metadata lookups
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Look up an object.
    ///
    /// Fails with [`VendError::NoSuchMetalake`] or [`VendError::NotFound`]
    /// when the object does not exist; returns `Ok(None)` when it exists but
    /// has no physical storage.
    async fn lookup(&self, object: &MetadataObjectRef) -> Result<Option<ObjectStorage>>;
}

// =========== In-memory catalog ===========

struct CatalogEntry {
    storage: Arc<StorageConfig>,
    location: Option<String>,
    read_only: bool,
    schemas: HashMap<String, SchemaConfig>,
}

impl CatalogEntry {
    fn new(metalake: &str, config: CatalogConfig) -> Self {
        let storage = StorageConfig::from_properties(
            format!("{metalake}.{}", config.name),
            config.properties,
        );
        Self {
            storage: Arc::new(storage),
            location: config.location,
            read_only: config.read_only,
            schemas: config
                .schemas
                .into_iter()
                .map(|s| (s.name.clone(), s))
                .collect(),
        }
    }

    fn capability(&self, read_only: bool) -> Permission {
        if self.read_only || read_only {
            Permission::Read
        } else {
            Permission::ReadWrite
        }
    }

    fn schema_location(&self, schema: &SchemaConfig) -> Option<String> {
        schema
            .location
            .clone()
            .or_else(|| self.location.as_deref().map(|l| join(l, &schema.name)))
    }

    fn storage(&self, locations: Vec<String>, read_only: bool) -> Option<ObjectStorage> {
        if locations.is_empty() {
            return None;
        }
        Some(ObjectStorage {
            storage: self.storage.clone(),
            locations,
            capability: self.capability(read_only),
        })
    }
}

/// Metadata lookup over a static, in-memory catalog tree
#[derive(Default)]
pub struct InMemoryCatalog {
    metalakes: RwLock<HashMap<String, HashMap<String, CatalogEntry>>>,
}

impl InMemoryCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `metalakes` configuration section
    #[must_use]
    pub fn from_config(metalakes: &[MetalakeConfig]) -> Self {
        let catalog = Self::new();
        for metalake in metalakes {
            catalog.insert_metalake(metalake.clone());
        }
        catalog
    }

    /// Add or replace a metalake
    pub fn insert_metalake(&self, config: MetalakeConfig) {
        let name = config.name.clone();
        let catalogs = config
            .catalogs
            .into_iter()
            .map(|c| (c.name.clone(), CatalogEntry::new(&name, c)))
            .collect();
        self.metalakes.write().insert(name, catalogs);
    }

    /// Remove a metalake; returns whether it existed
    pub fn remove_metalake(&self, name: &str) -> bool {
        self.metalakes.write().remove(name).is_some()
    }

    /// Storage configurations of every catalog, for bootstrap validation
    #[must_use]
    pub fn storage_configs(&self) -> Vec<Arc<StorageConfig>> {
        let metalakes = self.metalakes.read();
        let mut configs: Vec<_> = metalakes
            .values()
            .flat_map(|catalogs| catalogs.values().map(|c| c.storage.clone()))
            .collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }

    fn find(&self, object: &MetadataObjectRef) -> Result<Option<ObjectStorage>> {
        let metalakes = self.metalakes.read();
        let catalogs = metalakes
            .get(object.metalake())
            .ok_or_else(|| VendError::NoSuchMetalake(object.metalake().to_string()))?;

        let not_found = || VendError::not_found(object);
        let name = object.full_name();

        if object.object_type() == MetadataObjectType::Metalake {
            return if name[0] == object.metalake() {
                Ok(None)
            } else {
                Err(not_found())
            };
        }
        if object.object_type() == MetadataObjectType::Role {
            // Roles live outside the catalog tree; existence is not tracked here
            return Ok(None);
        }

        let catalog = catalogs.get(&name[0]).ok_or_else(not_found)?;
        if object.object_type() == MetadataObjectType::Catalog {
            let locations = catalog.location.iter().cloned().collect();
            return Ok(catalog.storage(locations, false));
        }

        let schema = catalog.schemas.get(&name[1]).ok_or_else(not_found)?;
        let schema_location = catalog.schema_location(schema);
        let leaf = |objects: &[ObjectConfig]| -> Result<Option<ObjectStorage>> {
            let object = objects
                .iter()
                .find(|o| o.name == name[2])
                .ok_or_else(not_found)?;
            Ok(catalog.storage(
                object_locations(object, schema_location.as_deref()),
                schema.read_only || object.read_only,
            ))
        };

        match object.object_type() {
            MetadataObjectType::Schema => Ok(catalog.storage(
                schema_location.iter().cloned().collect(),
                schema.read_only,
            )),
            MetadataObjectType::Table => leaf(&schema.tables),
            MetadataObjectType::Fileset => leaf(&schema.filesets),
            MetadataObjectType::Model => leaf(&schema.models),
            MetadataObjectType::Topic => {
                if schema.topics.iter().any(|t| *t == name[2]) {
                    Ok(None)
                } else {
                    Err(not_found())
                }
            }
            MetadataObjectType::Column => {
                let table = schema
                    .tables
                    .iter()
                    .find(|t| t.name == name[2])
                    .ok_or_else(not_found)?;
                if table.columns.iter().any(|c| *c == name[3]) {
                    Ok(None)
                } else {
                    Err(not_found())
                }
            }
            MetadataObjectType::Metalake
            | MetadataObjectType::Role
            | MetadataObjectType::Catalog => Ok(None),
        }
    }
}

#[async_trait]
impl MetadataLookup for InMemoryCatalog {
    async fn lookup(&self, object: &MetadataObjectRef) -> Result<Option<ObjectStorage>> {
        self.find(object)
    }
}

/// Explicit locations, or `<schema location>/<name>`
fn object_locations(object: &ObjectConfig, schema_location: Option<&str>) -> Vec<String> {
    if object.locations.is_empty() {
        schema_location
            .map(|l| vec![join(l, &object.name)])
            .unwrap_or_default()
    } else {
        object.locations.clone()
    }
}

fn join(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}
