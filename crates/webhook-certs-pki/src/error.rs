//! Error types for certificate lifecycle operations
//!
//! Validity problems (`EmptyArtifact`, `MalformedArtifact`,
//! `ChainVerificationFailure`) are what drive rotation; the engine folds them
//! into an "invalid" signal. `CryptoGenerationFailure` is never recoverable
//! inside a pass and always bubbles to the caller.

use thiserror::Error;

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// An artifact blob is missing or zero-length
    #[error("empty artifact: {0}")]
    EmptyArtifact(String),

    /// An artifact could not be decoded as PEM, DER, certificate or key
    #[error("malformed artifact: {0}")]
    MalformedArtifact(String),

    /// The leaf does not chain to the trust anchor for the requested host and time
    #[error("chain verification failed: {0}")]
    ChainVerificationFailure(String),

    /// Key generation or signing failed
    #[error("crypto generation failed: {0}")]
    CryptoGenerationFailure(String),
}

impl PkiError {
    /// Create an empty artifact error
    pub fn empty(what: impl Into<String>) -> Self {
        Self::EmptyArtifact(what.into())
    }

    /// Create a malformed artifact error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedArtifact(msg.into())
    }

    /// Create a chain verification error
    pub fn verification(msg: impl Into<String>) -> Self {
        Self::ChainVerificationFailure(msg.into())
    }

    /// Create a crypto generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::CryptoGenerationFailure(msg.into())
    }

    /// Whether a rotation pass can recover from this error by reissuing artifacts
    ///
    /// Only generation failures are fatal; everything else describes the state
    /// of the stored artifacts and is fixed by rotating them.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::CryptoGenerationFailure(_))
    }
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure_category() {
        assert!(PkiError::empty("ca.crt")
            .to_string()
            .contains("empty artifact: ca.crt"));
        assert!(PkiError::malformed("no PEM block found")
            .to_string()
            .contains("malformed artifact"));
        assert!(PkiError::verification("certificate expired")
            .to_string()
            .contains("chain verification failed"));
        assert!(PkiError::generation("rng exhausted")
            .to_string()
            .contains("crypto generation failed"));
    }

    #[test]
    fn only_generation_failures_are_fatal() {
        assert!(PkiError::empty("tls.key").is_recoverable());
        assert!(PkiError::malformed("bad CA cert").is_recoverable());
        assert!(PkiError::verification("wrong host").is_recoverable());
        assert!(!PkiError::generation("signing failed").is_recoverable());
    }
}
