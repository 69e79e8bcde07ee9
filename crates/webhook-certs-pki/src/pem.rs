//! PEM armor for certificates and private keys
//!
//! Certificates are armored as `CERTIFICATE`, private keys as PKCS#8
//! `PRIVATE KEY`. Decoding takes the first PEM block in the input.

use rcgen::KeyPair;

use crate::error::{PkiError, Result};

/// PEM tag for X.509 certificates
pub const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// PEM tag for PKCS#8 private keys
pub const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";

/// Encode a DER certificate and its private key as `(cert_pem, key_pem)`
pub fn encode(certificate_der: &[u8], key: &KeyPair) -> (String, String) {
    let cert_pem = ::pem::encode(&::pem::Pem::new(CERTIFICATE_TAG, certificate_der.to_vec()));
    let key_pem = ::pem::encode(&::pem::Pem::new(PRIVATE_KEY_TAG, key.serialize_der()));
    (cert_pem, key_pem)
}

/// Decode the first PEM block and return its DER contents
pub fn decode(pem_data: &[u8]) -> Result<Vec<u8>> {
    let block = ::pem::parse(pem_data)
        .map_err(|e| PkiError::malformed(format!("no PEM block found: {}", e)))?;
    Ok(block.into_contents())
}

/// Decode a PEM private key into a key pair usable for signing
pub fn decode_key(pem_data: &[u8]) -> Result<KeyPair> {
    let pem_str = std::str::from_utf8(pem_data)
        .map_err(|e| PkiError::malformed(format!("private key is not valid UTF-8: {}", e)))?;
    KeyPair::from_pem(pem_str)
        .map_err(|e| PkiError::malformed(format!("failed to parse private key: {}", e)))
}
