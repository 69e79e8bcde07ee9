//! Key pair artifacts and validity windows
//!
//! A [`KeyPairArtifacts`] holds one certificate and its private key in both
//! structured and PEM-encoded form. The PEM fields are always produced from
//! the structured fields, so the two never diverge.

use rcgen::{KeyPair, SignatureAlgorithm, PKCS_ECDSA_P256_SHA256, PKCS_RSA_SHA256};
use ::time::{Duration, OffsetDateTime};
use x509_parser::prelude::*;

use crate::error::{PkiError, Result};
use crate::pem;

/// Validity period for issued CA and leaf certificates (10 years)
pub const CERT_VALIDITY: Duration = Duration::days(10 * 365);

/// How far before issuance `not_before` is placed to tolerate clock skew
pub const CLOCK_SKEW_BACKDATE: Duration = Duration::hours(1);

/// Time window during which a certificate is valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    /// Start of validity (inclusive)
    pub not_before: OffsetDateTime,
    /// End of validity (inclusive)
    pub not_after: OffsetDateTime,
}

impl ValidityWindow {
    /// Create a window from explicit bounds
    pub fn new(not_before: OffsetDateTime, not_after: OffsetDateTime) -> Self {
        Self {
            not_before,
            not_after,
        }
    }

    /// Window for a certificate issued at `now`: `now - backdate ..= now + validity`
    ///
    /// Fails with `CryptoGenerationFailure` if either bound falls outside the
    /// representable date range.
    pub fn starting_at(
        now: OffsetDateTime,
        backdate: Duration,
        validity: Duration,
    ) -> Result<Self> {
        let not_before = now.checked_sub(backdate).ok_or_else(|| {
            PkiError::generation(format!("backdate of {} is out of range", backdate))
        })?;
        let not_after = now.checked_add(validity).ok_or_else(|| {
            PkiError::generation(format!("validity of {} is out of range", validity))
        })?;
        Ok(Self::new(not_before, not_after))
    }

    /// Whether `at` falls inside the window
    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// Key algorithm used for newly generated key pairs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// 2048-bit RSA with SHA-256 signatures
    #[default]
    Rsa2048,
    /// ECDSA on P-256 with SHA-256 signatures
    EcdsaP256,
}

impl KeyAlgorithm {
    fn signature_algorithm(self) -> &'static SignatureAlgorithm {
        match self {
            Self::Rsa2048 => &PKCS_RSA_SHA256,
            Self::EcdsaP256 => &PKCS_ECDSA_P256_SHA256,
        }
    }

    /// Generate a fresh key pair
    pub fn generate(self) -> Result<KeyPair> {
        KeyPair::generate_for(self.signature_algorithm()).map_err(|e| {
            PkiError::generation(format!("failed to generate {:?} key: {}", self, e))
        })
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" | "rsa2048" | "rsa-2048" => Ok(Self::Rsa2048),
            "ecdsa" | "ecdsa-p256" | "p256" => Ok(Self::EcdsaP256),
            other => Err(format!("unknown key algorithm: {}", other)),
        }
    }
}

/// A certificate and its private key, structured and PEM-encoded
pub struct KeyPairArtifacts {
    cert_der: Vec<u8>,
    key: KeyPair,
    cert_pem: String,
    key_pem: String,
}

impl std::fmt::Debug for KeyPairArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairArtifacts")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

impl KeyPairArtifacts {
    /// Build artifacts from a DER certificate and its key, deriving the PEM forms
    pub(crate) fn from_parts(cert_der: Vec<u8>, key: KeyPair) -> Self {
        let (cert_pem, key_pem) = pem::encode(&cert_der, &key);
        Self {
            cert_der,
            key,
            cert_pem,
            key_pem,
        }
    }

    /// Rebuild artifacts from stored PEM blobs
    ///
    /// Fails with `EmptyArtifact` if either blob is empty and with
    /// `MalformedArtifact` if either cannot be parsed.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        if cert_pem.is_empty() {
            return Err(PkiError::empty("certificate"));
        }
        if key_pem.is_empty() {
            return Err(PkiError::empty("private key"));
        }

        let cert_der = pem::decode(cert_pem)?;
        X509Certificate::from_der(&cert_der)
            .map_err(|e| PkiError::malformed(format!("failed to parse certificate: {}", e)))?;
        let key = pem::decode_key(key_pem)?;

        Ok(Self::from_parts(cert_der, key))
    }

    /// DER-encoded certificate
    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    /// Private key
    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    /// PEM-encoded certificate
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// PEM-encoded PKCS#8 private key
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Parsed X.509 view of the certificate
    pub fn certificate(&self) -> Result<X509Certificate<'_>> {
        let (_, cert) = X509Certificate::from_der(&self.cert_der)
            .map_err(|e| PkiError::malformed(format!("failed to parse certificate: {}", e)))?;
        Ok(cert)
    }

    /// Validity window recorded in the certificate
    pub fn validity(&self) -> Result<ValidityWindow> {
        let cert = self.certificate()?;
        let validity = cert.validity();
        Ok(ValidityWindow::new(
            to_datetime(validity.not_before.timestamp())?,
            to_datetime(validity.not_after.timestamp())?,
        ))
    }
}

fn to_datetime(timestamp: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .map_err(|e| PkiError::malformed(format!("certificate time out of range: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_backdated_for_clock_skew() {
        let now = OffsetDateTime::now_utc();
        let window = ValidityWindow::starting_at(now, CLOCK_SKEW_BACKDATE, CERT_VALIDITY)
            .expect("window should be in range");

        assert_eq!(window.not_before, now - Duration::hours(1));
        assert_eq!(window.not_after, now + Duration::days(3650));
        assert!(window.contains(now));
        assert!(window.contains(now - Duration::minutes(30)));
        assert!(!window.contains(now - Duration::hours(2)));
        assert!(!window.contains(now + Duration::days(3651)));
    }

    #[test]
    fn window_past_the_last_representable_date_is_an_error() {
        let now = OffsetDateTime::now_utc();
        let err = ValidityWindow::starting_at(now, CLOCK_SKEW_BACKDATE, Duration::days(3_000_000))
            .expect_err("window should be out of range");
        assert!(matches!(err, PkiError::CryptoGenerationFailure(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn key_algorithm_parses_cli_spellings() {
        assert_eq!("rsa2048".parse::<KeyAlgorithm>(), Ok(KeyAlgorithm::Rsa2048));
        assert_eq!("RSA".parse::<KeyAlgorithm>(), Ok(KeyAlgorithm::Rsa2048));
        assert_eq!("ecdsa-p256".parse::<KeyAlgorithm>(), Ok(KeyAlgorithm::EcdsaP256));
        assert!("dsa".parse::<KeyAlgorithm>().is_err());
        assert_eq!(KeyAlgorithm::default(), KeyAlgorithm::Rsa2048);
    }

    #[test]
    fn empty_blobs_are_reported_as_empty() {
        assert!(matches!(
            KeyPairArtifacts::from_pem(b"", b"key"),
            Err(PkiError::EmptyArtifact(_))
        ));
        assert!(matches!(
            KeyPairArtifacts::from_pem(b"cert", b""),
            Err(PkiError::EmptyArtifact(_))
        ));
    }

    #[test]
    fn non_pem_blobs_are_malformed() {
        assert!(matches!(
            KeyPairArtifacts::from_pem(b"not a cert", b"not a key"),
            Err(PkiError::MalformedArtifact(_))
        ));
    }

    #[test]
    fn pem_forms_track_structured_forms() {
        let key = KeyAlgorithm::EcdsaP256
            .generate()
            .expect("key generation should succeed");
        let cert = rcgen::CertificateParams::new(vec!["artifacts.test.svc".to_string()])
            .expect("params should build")
            .self_signed(&key)
            .expect("self-signing should succeed");
        let artifacts = KeyPairArtifacts::from_parts(cert.der().to_vec(), key);

        let restored =
            KeyPairArtifacts::from_pem(artifacts.cert_pem().as_bytes(), artifacts.key_pem().as_bytes())
                .expect("stored artifacts should reload");

        assert_eq!(restored.cert_der(), artifacts.cert_der());
        assert_eq!(restored.cert_pem(), artifacts.cert_pem());
        assert_eq!(restored.key_pem(), artifacts.key_pem());
    }
}
