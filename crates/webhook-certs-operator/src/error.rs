//! Error types for the webhook certificate operator

use thiserror::Error;
use webhook_certs_pki::PkiError;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Certificate issuance or reconstruction failed
    #[error("pki error: {0}")]
    Pki(#[from] PkiError),

    /// Target resource is missing an expected field
    #[error("field `{path}` not found in {kind}")]
    FieldNotFound {
        /// Resource kind that was being patched
        kind: String,
        /// Dotted path of the missing field
        path: String,
    },

    /// A label selector did not match exactly one object
    #[error("selector error: {0}")]
    Selector(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Create a field-not-found error for `path` in a resource of `kind`
    pub fn field_not_found(kind: impl Into<String>, path: impl Into<String>) -> Self {
        Self::FieldNotFound {
            kind: kind.into(),
            path: path.into(),
        }
    }

    /// Create a selector error with the given message
    pub fn selector(msg: impl Into<String>) -> Self {
        Self::Selector(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether retrying the same pass can succeed without an external change
    ///
    /// A malformed target or bad configuration needs someone to fix it; the
    /// next watch event re-triggers the pass anyway.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(_) | Self::Selector(_) | Self::Serialization(_) => true,
            Self::Pki(e) => e.is_recoverable(),
            Self::FieldNotFound { .. } | Self::Validation(_) => false,
        }
    }
}
