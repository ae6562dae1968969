//! credvend Provider - Credential minting for cloud object stores
//!
//! This crate provides:
//! - The [`CredentialProvider`] trait and the seven built-in providers
//! - AWS SigV4 and Aliyun RPC request signing for STS calls
//! - Inline session policies scoping temporary credentials to prefixes
//! - The [`ProviderRegistry`] mapping declared credential types to providers

pub mod error;
pub mod location;
pub mod policy;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod signing;

pub use error::ProviderError;
pub use provider::{CredentialInfo, CredentialProvider, MintContext, ProviderFactory};
pub use registry::{ProviderRegistry, ProviderSet};
