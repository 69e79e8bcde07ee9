//! Certificate issuance
//!
//! Mints a self-signed CA and leaf (server) certificates signed by that CA.
//!
//! Every certificate gets a fresh random 128-bit serial number, so
//! independently created CAs and leaves never collide on `(issuer, serial)`.

use rand::RngCore;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyUsagePurpose, SanType, SerialNumber,
};
use tracing::debug;

use crate::artifacts::{KeyAlgorithm, KeyPairArtifacts, ValidityWindow};
use crate::error::{PkiError, Result};

/// Issue a new self-signed certificate authority
///
/// The CA's subject common name and its only DNS SAN are both `common_name`;
/// `organization` is added to the subject when non-empty.
pub fn issue_ca(
    window: &ValidityWindow,
    common_name: &str,
    organization: &str,
    algorithm: KeyAlgorithm,
) -> Result<KeyPairArtifacts> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    if !organization.is_empty() {
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(organization.to_string()),
        );
    }
    params.distinguished_name = dn;
    params.subject_alt_names = vec![dns_san(common_name)?];

    // CA settings
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::KeyCertSign,
    ];

    params.not_before = window.not_before;
    params.not_after = window.not_after;
    params.serial_number = Some(random_serial());

    let key = algorithm.generate()?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| PkiError::generation(format!("failed to create CA cert: {}", e)))?;

    debug!(common_name = %common_name, "issued CA certificate");
    Ok(KeyPairArtifacts::from_parts(cert.der().to_vec(), key))
}

/// Issue a leaf (server) certificate for `hostname` signed by `ca`
///
/// The leaf's subject common name and its only DNS SAN are `hostname`.
pub fn issue_leaf(
    ca: &KeyPairArtifacts,
    window: &ValidityWindow,
    hostname: &str,
    algorithm: KeyAlgorithm,
) -> Result<KeyPairArtifacts> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(hostname.to_string()));
    params.distinguished_name = dn;
    params.subject_alt_names = vec![dns_san(hostname)?];

    // Not a CA
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    params.not_before = window.not_before;
    params.not_after = window.not_after;
    params.serial_number = Some(random_serial());

    let key = algorithm.generate()?;

    let issuer = Issuer::from_ca_cert_pem(ca.cert_pem(), ca.key())
        .map_err(|e| PkiError::malformed(format!("failed to create issuer: {}", e)))?;

    let cert = params
        .signed_by(&key, &issuer)
        .map_err(|e| PkiError::generation(format!("failed to sign leaf cert: {}", e)))?;

    debug!(hostname = %hostname, "issued leaf certificate");
    Ok(KeyPairArtifacts::from_parts(cert.der().to_vec(), key))
}

fn dns_san(name: &str) -> Result<SanType> {
    Ia5String::try_from(name.to_string())
        .map(SanType::DnsName)
        .map_err(|e| PkiError::generation(format!("invalid DNS name '{}': {}", name, e)))
}

/// Positive, non-zero 128-bit serial
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0x7f) | 0x40;
    SerialNumber::from_slice(&bytes)
}
