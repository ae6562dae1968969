//! Error types for credvend
//!
//! Every failure surfaced by the vending path is a [`VendError`]. Provider
//! failures are reduced to a [`MintFailureKind`] before they get here so
//! that upstream messages and secrets never reach a caller.

use crate::types::{CredentialType, MetadataObjectRef, ObjectRefError};
use std::fmt;
use thiserror::Error;

/// Common result type for credvend operations
pub type Result<T> = std::result::Result<T, VendError>;

/// Classified reason a credential could not be minted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MintFailureKind {
    /// The upstream identity service did not answer in time
    Timeout,
    /// The upstream identity service answered with an error or was unreachable
    Upstream,
    /// The upstream identity service refused the request (bad keys, denied role)
    Rejected,
    /// The upstream answer could not be understood
    InvalidResponse,
    /// The storage's provider properties are incomplete or invalid
    Configuration,
    /// Anything else
    Internal,
}

impl MintFailureKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "upstream identity service timed out",
            Self::Upstream => "upstream identity service unavailable",
            Self::Rejected => "upstream identity service rejected the request",
            Self::InvalidResponse => "upstream identity service returned an invalid response",
            Self::Configuration => "credential provider is misconfigured",
            Self::Internal => "internal provider error",
        }
    }

    /// Whether a later attempt may succeed without operator action
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Upstream)
    }
}

impl fmt::Display for MintFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common error type for credvend
#[derive(Debug, Clone, Error)]
pub enum VendError {
    // Request errors
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("metalake {0} does not exist")]
    NoSuchMetalake(String),

    #[error("{0} does not exist")]
    NotFound(String),

    #[error("credentials are not supported for {0}")]
    UnsupportedObjectType(String),

    #[error("credential type {requested} is not configured for {object}")]
    UnsupportedCredentialType { requested: String, object: String },

    // Provider errors
    #[error("no credential provider registered for type {0}")]
    NoProvider(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// A declared provider could not be built from the storage's properties
    #[error("credential provider {credential_type} for {storage} is misconfigured: {detail}")]
    ProviderMisconfigured {
        credential_type: String,
        storage: String,
        detail: String,
    },

    #[error("failed to mint {credential_type} credential: {kind}")]
    ProviderMint {
        credential_type: String,
        kind: MintFailureKind,
    },

    #[error("{credential_type} credential is unavailable: {reason}")]
    CredentialUnavailable {
        credential_type: String,
        reason: MintFailureKind,
    },

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl VendError {
    /// Create an illegal argument error
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }

    /// Create a not found error for an object
    #[must_use]
    pub fn not_found(object: &MetadataObjectRef) -> Self {
        Self::NotFound(object.to_string())
    }

    /// Create an unsupported credential type error
    #[must_use]
    pub fn unsupported_credential_type(
        requested: &CredentialType,
        object: &MetadataObjectRef,
    ) -> Self {
        Self::UnsupportedCredentialType {
            requested: requested.to_string(),
            object: object.to_string(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Message safe to return to a caller. Configuration and internal
    /// details stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::ProviderMisconfigured {
                credential_type, ..
            } => format!("credential provider {credential_type} is misconfigured"),
            Self::Configuration(_) => MintFailureKind::Configuration.as_str().to_string(),
            Self::Internal(_) => "internal error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderMint { kind, .. } => kind.is_transient(),
            Self::CredentialUnavailable { reason, .. } => reason.is_transient(),
            _ => false,
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchMetalake(_) | Self::NotFound(_))
    }

    /// HTTP status code of the error envelope
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::IllegalArgument(_)
            | Self::UnsupportedObjectType(_)
            | Self::UnsupportedCredentialType { .. } => 400,
            Self::NoSuchMetalake(_) | Self::NotFound(_) => 404,
            Self::CredentialUnavailable { .. } => 503,
            Self::NoProvider(_)
            | Self::Configuration(_)
            | Self::ProviderMisconfigured { .. }
            | Self::ProviderMint { .. }
            | Self::Internal(_) => 500,
        }
    }

    /// Numeric error code carried in the envelope's `code` field
    #[must_use]
    pub const fn error_code(&self) -> i32 {
        match self.http_status_code() {
            400 => 1001,
            404 => 1003,
            _ => 1002,
        }
    }

    /// Exception-style type name carried in the envelope's `type` field
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::IllegalArgument(_)
            | Self::UnsupportedObjectType(_)
            | Self::UnsupportedCredentialType { .. } => "IllegalArgumentException",
            Self::NoSuchMetalake(_) => "NoSuchMetalakeException",
            Self::NotFound(_) => "NoSuchMetadataObjectException",
            Self::NoProvider(_)
            | Self::Configuration(_)
            | Self::ProviderMisconfigured { .. }
            | Self::ProviderMint { .. }
            | Self::CredentialUnavailable { .. }
            | Self::Internal(_) => "RuntimeException",
        }
    }
}

impl From<ObjectRefError> for VendError {
    fn from(err: ObjectRefError) -> Self {
        Self::IllegalArgument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code_mapping() {
        let err = VendError::illegal_argument("bad");
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(err.error_code(), 1001);

        let err = VendError::NoSuchMetalake("demo".into());
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(err.error_code(), 1003);
        assert!(err.is_not_found());

        let err = VendError::CredentialUnavailable {
            credential_type: "s3-token".into(),
            reason: MintFailureKind::Timeout,
        };
        assert_eq!(err.http_status_code(), 503);
        assert_eq!(err.error_code(), 1002);
        assert!(err.is_retryable());

        let err = VendError::CredentialUnavailable {
            credential_type: "s3-token".into(),
            reason: MintFailureKind::Rejected,
        };
        assert_eq!(err.http_status_code(), 503);
        assert_eq!(err.error_type(), "RuntimeException");
        assert!(!err.is_retryable());

        let err = VendError::ProviderMint {
            credential_type: "s3-token".into(),
            kind: MintFailureKind::Upstream,
        };
        assert_eq!(err.http_status_code(), 500);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_object_ref_error_is_illegal_argument() {
        let err: VendError = ObjectRefError::EmptySegment.into();
        assert!(matches!(err, VendError::IllegalArgument(_)));
        assert_eq!(err.error_type(), "IllegalArgumentException");
    }

    #[test]
    fn test_public_message_hides_configuration_detail() {
        let err = VendError::ProviderMisconfigured {
            credential_type: "gcs-token".into(),
            storage: "demo.lake".into(),
            detail: "cannot read /var/secrets/key.json: permission denied".into(),
        };
        assert!(err.to_string().contains("/var/secrets/key.json"));
        assert_eq!(err.public_message(), "credential provider gcs-token is misconfigured");
        assert_eq!(err.http_status_code(), 500);

        let err = VendError::internal("lock poisoned at cache.rs");
        assert_eq!(err.public_message(), "internal error");

        let err = VendError::NoSuchMetalake("demo".into());
        assert_eq!(err.public_message(), err.to_string());
    }

    #[test]
    fn test_mint_error_message_is_classified() {
        let err = VendError::ProviderMint {
            credential_type: "oss-token".into(),
            kind: MintFailureKind::Rejected,
        };
        assert_eq!(
            err.to_string(),
            "failed to mint oss-token credential: upstream identity service rejected the request"
        );
    }
}
