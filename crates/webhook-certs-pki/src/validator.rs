//! Certificate validation
//!
//! Answers one question: does `(ca, leaf, key)` form a usable serving
//! identity for `hostname` at time `at`? Callers evaluate this at a
//! lookahead time rather than "now", so a certificate that is about to
//! expire already reads as invalid.
//!
//! Verification failures (expired, wrong host, untrusted signer, key
//! mismatch) return `Ok(false)`. Only unusable inputs are errors.

use ::time::OffsetDateTime;
use tracing::debug;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

use crate::error::{PkiError, Result};
use crate::pem;

/// Check whether `cert_pem`/`key_pem` is valid under `ca_cert_pem` at `at`
///
/// `dns_name` is matched against the leaf's DNS subject alternative names;
/// `None` skips the hostname check. Passing the CA as both `ca_cert_pem` and
/// `cert_pem` checks the CA against itself.
///
/// # Errors
///
/// * `EmptyArtifact` if any input is empty
/// * `MalformedArtifact` if any input cannot be decoded or parsed
pub fn is_valid(
    ca_cert_pem: &[u8],
    cert_pem: &[u8],
    key_pem: &[u8],
    dns_name: Option<&str>,
    at: OffsetDateTime,
) -> Result<bool> {
    match verify(ca_cert_pem, cert_pem, key_pem, dns_name, at) {
        Ok(()) => Ok(true),
        Err(PkiError::ChainVerificationFailure(reason)) => {
            debug!(reason = %reason, "certificate is not valid");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Like [`is_valid`] but reports why verification failed
pub fn verify(
    ca_cert_pem: &[u8],
    cert_pem: &[u8],
    key_pem: &[u8],
    dns_name: Option<&str>,
    at: OffsetDateTime,
) -> Result<()> {
    if ca_cert_pem.is_empty() {
        return Err(PkiError::empty("CA certificate"));
    }
    if cert_pem.is_empty() {
        return Err(PkiError::empty("certificate"));
    }
    if key_pem.is_empty() {
        return Err(PkiError::empty("private key"));
    }

    let ca_der = pem::decode(ca_cert_pem)
        .map_err(|e| PkiError::malformed(format!("bad CA cert: {}", e)))?;
    let (_, ca) = X509Certificate::from_der(&ca_der)
        .map_err(|e| PkiError::malformed(format!("failed to parse CA cert: {}", e)))?;

    let cert_der = pem::decode(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| PkiError::malformed(format!("failed to parse certificate: {}", e)))?;

    let key = pem::decode_key(key_pem)?;
    if key.public_key_raw() != &*cert.public_key().subject_public_key.data {
        return Err(PkiError::verification(
            "private key does not match certificate public key",
        ));
    }

    let anchor = TrustAnchor {
        cert: &ca,
        is_leaf: ca_der == cert_der,
    };
    anchor.verify(&cert, dns_name, at)
}

/// Single-certificate trust anchor
struct TrustAnchor<'a, 'b> {
    cert: &'a X509Certificate<'b>,
    /// The anchor is the certificate being verified (CA self-check)
    is_leaf: bool,
}

impl TrustAnchor<'_, '_> {
    fn verify(
        &self,
        cert: &X509Certificate<'_>,
        dns_name: Option<&str>,
        at: OffsetDateTime,
    ) -> Result<()> {
        if !self.is_leaf && !self.cert.is_ca() {
            return Err(PkiError::verification(
                "trust anchor is not a certificate authority",
            ));
        }

        if cert.issuer().as_raw() != self.cert.subject().as_raw() {
            return Err(PkiError::verification(
                "certificate issuer does not match trust anchor subject",
            ));
        }

        cert.verify_signature(Some(self.cert.public_key()))
            .map_err(|e| PkiError::verification(format!("signature verification failed: {}", e)))?;

        check_time("trust anchor", self.cert, at)?;
        check_time("certificate", cert, at)?;
        check_server_auth(self.cert)?;
        check_server_auth(cert)?;

        if let Some(name) = dns_name {
            check_hostname(cert, name)?;
        }

        Ok(())
    }
}

fn check_time(what: &str, cert: &X509Certificate<'_>, at: OffsetDateTime) -> Result<()> {
    let at = at.unix_timestamp();
    let validity = cert.validity();

    if at < validity.not_before.timestamp() {
        return Err(PkiError::verification(format!("{} not yet valid", what)));
    }
    if at > validity.not_after.timestamp() {
        return Err(PkiError::verification(format!("{} expired", what)));
    }
    Ok(())
}

/// Certificates that restrict extended key usage must allow server auth
fn check_server_auth(cert: &X509Certificate<'_>) -> Result<()> {
    let eku = cert
        .extended_key_usage()
        .map_err(|e| PkiError::malformed(format!("failed to parse extended key usage: {}", e)))?;

    match eku {
        Some(eku) if !eku.value.any && !eku.value.server_auth => Err(PkiError::verification(
            "certificate is not valid for server authentication",
        )),
        _ => Ok(()),
    }
}

fn check_hostname(cert: &X509Certificate<'_>, host: &str) -> Result<()> {
    let san = cert
        .subject_alternative_name()
        .map_err(|e| PkiError::malformed(format!("failed to parse subject alt names: {}", e)))?;

    let matched = san
        .map(|san| {
            san.value.general_names.iter().any(|name| match name {
                GeneralName::DNSName(pattern) => matches_hostname(pattern, host),
                _ => false,
            })
        })
        .unwrap_or(false);

    if matched {
        Ok(())
    } else {
        Err(PkiError::verification(format!(
            "certificate is not valid for host '{}'",
            host
        )))
    }
}

/// TLS hostname matching: case-insensitive, trailing dot ignored, and a
/// leading `*.` label matches exactly one label of the host.
pub fn matches_hostname(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    if pattern.is_empty() || host.is_empty() {
        return false;
    }

    match pattern.strip_prefix("*.") {
        Some(suffix) => match host.split_once('.') {
            Some((first, rest)) => !first.is_empty() && rest == suffix,
            None => false,
        },
        None => pattern == host,
    }
}
