//! Storage location parsing
//!
//! Splits URIs like `s3://bucket/warehouse/t1` or
//! `abfss://container@account.dfs.core.windows.net/dir` into the parts the
//! providers need to scope a credential.

use crate::error::ProviderError;
use std::collections::BTreeMap;

/// A parsed object store location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    /// Lowercased URI scheme (`s3`, `s3a`, `gs`, `oss`, `abfss`, ...)
    pub scheme: String,
    /// Bucket (or, for Azure, container)
    pub bucket: String,
    /// Azure storage account, parsed from the authority's host
    pub account: Option<String>,
    /// Key prefix without leading or trailing `/` (empty for the whole bucket)
    pub prefix: String,
}

impl StorageLocation {
    pub fn parse(location: &str) -> Result<Self, ProviderError> {
        let (scheme, rest) = location
            .split_once("://")
            .ok_or_else(|| ProviderError::unsupported_scope(format!("not a URI: {location}")))?;
        let scheme = scheme.to_ascii_lowercase();

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        if authority.is_empty() {
            return Err(ProviderError::unsupported_scope(format!(
                "missing bucket in {location}"
            )));
        }

        let (bucket, account) = match authority.split_once('@') {
            Some((container, host)) => {
                let account = host.split('.').next().unwrap_or_default();
                if container.is_empty() || account.is_empty() {
                    return Err(ProviderError::unsupported_scope(format!(
                        "malformed authority in {location}"
                    )));
                }
                (container.to_string(), Some(account.to_string()))
            }
            None => (authority.to_string(), None),
        };

        Ok(Self {
            scheme,
            bucket,
            account,
            prefix: path.trim_matches('/').to_string(),
        })
    }

    /// Prefix pattern matching every object under this location
    #[must_use]
    pub fn object_pattern(&self) -> String {
        if self.prefix.is_empty() {
            "*".to_string()
        } else {
            format!("{}/*", self.prefix)
        }
    }

    /// Check the scheme against a provider's accepted set
    pub fn expect_scheme(&self, accepted: &[&str]) -> Result<(), ProviderError> {
        if accepted.contains(&self.scheme.as_str()) {
            Ok(())
        } else {
            Err(ProviderError::unsupported_scope(format!(
                "scheme {} is not one of {}",
                self.scheme,
                accepted.join(", ")
            )))
        }
    }
}

/// Parse every location and group prefixes by bucket
pub fn group_by_bucket<'a, I>(
    locations: I,
    accepted_schemes: &[&str],
) -> Result<BTreeMap<String, Vec<StorageLocation>>, ProviderError>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut buckets: BTreeMap<String, Vec<StorageLocation>> = BTreeMap::new();
    for location in locations {
        let parsed = StorageLocation::parse(location)?;
        parsed.expect_scheme(accepted_schemes)?;
        buckets.entry(parsed.bucket.clone()).or_default().push(parsed);
    }
    if buckets.is_empty() {
        return Err(ProviderError::unsupported_scope("scope has no locations"));
    }
    Ok(buckets)
}
