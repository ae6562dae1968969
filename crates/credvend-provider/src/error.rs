//! Provider error types

use credvend_common::{CredentialType, MintFailureKind, VendError};
use thiserror::Error;

/// Errors raised by a credential provider
///
/// Messages may carry upstream detail and are meant for logs only. They are
/// reduced to a [`MintFailureKind`] before reaching a caller.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing required property: {0}")]
    MissingProperty(String),

    #[error("upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unsupported scope: {0}")]
    UnsupportedScope(String),
}

impl ProviderError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn unsupported_scope(msg: impl Into<String>) -> Self {
        Self::UnsupportedScope(msg.into())
    }

    /// Classify for callers
    #[must_use]
    pub const fn kind(&self) -> MintFailureKind {
        match self {
            Self::Configuration(_) | Self::MissingProperty(_) => MintFailureKind::Configuration,
            Self::Upstream { status, .. } => {
                if *status == 429 || *status >= 500 {
                    MintFailureKind::Upstream
                } else {
                    MintFailureKind::Rejected
                }
            }
            Self::Transport(_) => MintFailureKind::Upstream,
            Self::Timeout => MintFailureKind::Timeout,
            Self::InvalidResponse(_) => MintFailureKind::InvalidResponse,
            Self::UnsupportedScope(_) => MintFailureKind::Rejected,
        }
    }

    /// Convert into the caller-facing mint error for `credential_type`
    #[must_use]
    pub fn into_vend_error(self, credential_type: &CredentialType) -> VendError {
        VendError::ProviderMint {
            credential_type: credential_type.to_string(),
            kind: self.kind(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
