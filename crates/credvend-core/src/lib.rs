//! credvend Core - Scope resolution, caching and vending
//!
//! This crate provides:
//! - The [`MetadataLookup`] collaborator trait and an in-memory catalog
//! - [`ScopeResolver`] turning metadata objects into storage scopes
//! - [`CredentialCache`] with at-most-one-mint per key and stale fallback
//! - [`VendingCoordinator`], the entry point used by the REST layer

pub mod cache;
pub mod coordinator;
pub mod lookup;
pub mod observer;
pub mod scope;

pub use cache::{CacheKey, CacheStatsSnapshot, CredentialCache};
pub use coordinator::VendingCoordinator;
pub use lookup::{InMemoryCatalog, MetadataLookup, ObjectStorage};
pub use observer::{MetricsObserver, NoopObserver, VendingObserver};
pub use scope::{ResolvedScope, ScopeResolver};
