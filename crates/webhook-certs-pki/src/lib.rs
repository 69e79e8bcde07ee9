//! Certificate lifecycle engine for webhook serving certificates
//!
//! This crate issues and rotates a self-signed CA and a leaf (server)
//! certificate for a webhook endpoint:
//!
//! - **PEM**: armor for certificates and PKCS#8 private keys
//! - **Validator**: chain, key, hostname and time checks with a lookahead margin
//! - **Issuer**: CA and leaf issuance with random serials
//! - **Rotation**: decides between CA+leaf, leaf-only or no rotation
//! - **Store**: the four-blob artifact bundle and the store contract
//!
//! # Architecture
//!
//! The engine is pure and synchronous. It takes a bundle snapshot and a
//! resolved hostname and returns the next bundle; persistence, scheduling and
//! process lifecycle belong to the caller.
//!
//! # Public API
//!
//! - [`RotationEngine`], [`RotationConfig`], [`RotationOutcome`]: one rotation pass
//! - [`rotate_store`]: load, rotate and save against an [`ArtifactStore`]
//! - [`issue_ca`], [`issue_leaf`]: certificate issuance
//! - [`is_valid`]: certificate validation
//! - [`PkiError`]: error type for all operations

#![deny(missing_docs)]

pub mod artifacts;
pub mod error;
pub mod issuer;
pub mod pem;
pub mod rotation;
pub mod store;
pub mod validator;

pub use artifacts::{KeyAlgorithm, KeyPairArtifacts, ValidityWindow, CERT_VALIDITY};
pub use error::{PkiError, Result};
pub use issuer::{issue_ca, issue_leaf};
pub use rotation::{
    rotate_store, RestartPolicy, RotateError, Rotation, RotationConfig, RotationEngine,
    RotationOutcome,
};
pub use store::{ArtifactBundle, ArtifactKey, ArtifactStore, MemoryArtifactStore};
pub use validator::{is_valid, matches_hostname};
