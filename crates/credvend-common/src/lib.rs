//! credvend Common - Shared types and utilities
//!
//! This crate provides the data model of the credential vending subsystem
//! (metadata object references, storage scopes, credentials), the error
//! taxonomy surfaced to callers, and the configuration structures shared by
//! the library crates and the server binary.

pub mod config;
pub mod error;
pub mod storage;
pub mod types;

pub use config::VendingConfig;
pub use error::{MintFailureKind, Result, VendError};
pub use storage::{CREDENTIAL_PROVIDERS_PROPERTY, StorageConfig};
pub use types::*;
