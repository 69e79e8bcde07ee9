//! Rotation engine
//!
//! Decides, per pass, whether the CA, the leaf, or nothing needs to be
//! reissued and produces the next [`ArtifactBundle`].
//!
//! Validity is always judged at `now + lookahead`, so certificates that are
//! about to expire are treated as already invalid.
//!
//! # Concurrency
//!
//! A pass is synchronous and performs no I/O. It is **not** safe to run two
//! passes concurrently against the same mutable store: both would decide to
//! rotate independently and race on the final save. Callers must serialize
//! passes per store (the Kubernetes controller runtime does this per object).

use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::artifacts::{
    KeyAlgorithm, KeyPairArtifacts, ValidityWindow, CERT_VALIDITY, CLOCK_SKEW_BACKDATE,
};
use crate::error::{PkiError, Result};
use crate::issuer::{issue_ca, issue_leaf};
use crate::store::{ArtifactBundle, ArtifactStore};
use crate::validator;

/// Default lookahead margin: rotate 90 days before expiry
pub const DEFAULT_LOOKAHEAD: Duration = Duration::days(90);

/// Default CA common name
pub const DEFAULT_CA_NAME: &str = "webhook-ca";

/// Whether a rotation should ask the host process to restart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Keep running with the in-memory result
    #[default]
    Never,
    /// Request a restart after any rotation
    OnRotation,
}

/// Settings for the rotation engine
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Common name (and DNS SAN) of the CA
    pub ca_name: String,
    /// Organization of the CA subject; empty to omit
    pub ca_organization: String,
    /// Validity of newly issued certificates
    pub validity: Duration,
    /// Margin added to `now` when checking validity
    pub lookahead: Duration,
    /// How far `not_before` is backdated
    pub backdate: Duration,
    /// Algorithm for newly generated keys
    pub key_algorithm: KeyAlgorithm,
    /// Check the CA certificate against its own name
    pub verify_ca_hostname: bool,
    /// Restart signalling after rotation
    pub restart_policy: RestartPolicy,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            ca_name: DEFAULT_CA_NAME.to_string(),
            ca_organization: String::new(),
            validity: CERT_VALIDITY,
            lookahead: DEFAULT_LOOKAHEAD,
            backdate: CLOCK_SKEW_BACKDATE,
            key_algorithm: KeyAlgorithm::default(),
            verify_ca_hostname: true,
            restart_policy: RestartPolicy::default(),
        }
    }
}

/// What a rotation pass changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Both certificates were still valid
    None,
    /// Only the leaf was reissued; CA blobs are untouched
    Leaf,
    /// A new CA and a new leaf were issued
    CaAndLeaf,
}

impl Rotation {
    /// Short label for logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Leaf => "leaf",
            Self::CaAndLeaf => "ca-and-leaf",
        }
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one rotation pass
#[derive(Debug, Clone)]
pub struct RotationOutcome {
    /// What changed
    pub rotation: Rotation,
    /// Bundle to persist; equal to the input when nothing rotated
    pub bundle: ArtifactBundle,
    /// Whether the host process should restart to pick up new artifacts
    pub restart_requested: bool,
}

impl RotationOutcome {
    /// Whether any artifact changed
    pub fn rotated(&self) -> bool {
        self.rotation != Rotation::None
    }
}

/// Orchestrates the validator and issuer over an artifact bundle
#[derive(Debug, Clone, Default)]
pub struct RotationEngine {
    config: RotationConfig,
}

impl RotationEngine {
    /// Create an engine with the given settings
    pub fn new(config: RotationConfig) -> Self {
        Self { config }
    }

    /// Engine settings
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Whether the stored CA is usable at `now + lookahead`
    ///
    /// Any validation error (empty, malformed) counts as invalid.
    pub fn ca_is_valid(&self, bundle: &ArtifactBundle, now: OffsetDateTime) -> bool {
        let hostname = self
            .config
            .verify_ca_hostname
            .then_some(self.config.ca_name.as_str());
        self.check(
            "CA",
            &bundle.ca_cert,
            &bundle.ca_cert,
            &bundle.ca_key,
            hostname,
            now,
        )
    }

    /// Whether the stored leaf is usable for `hostname` at `now + lookahead`
    pub fn leaf_is_valid(
        &self,
        bundle: &ArtifactBundle,
        hostname: &str,
        now: OffsetDateTime,
    ) -> bool {
        self.check(
            "leaf",
            &bundle.ca_cert,
            &bundle.leaf_cert,
            &bundle.leaf_key,
            Some(hostname),
            now,
        )
    }

    fn check(
        &self,
        what: &str,
        ca_cert: &[u8],
        cert: &[u8],
        key: &[u8],
        hostname: Option<&str>,
        now: OffsetDateTime,
    ) -> bool {
        let valid = self
            .lookahead_from(now)
            .and_then(|at| validator::is_valid(ca_cert, cert, key, hostname, at));
        match valid {
            Ok(valid) => valid,
            Err(e) => {
                debug!(certificate = what, error = %e, "treating certificate as invalid");
                false
            }
        }
    }

    fn lookahead_from(&self, now: OffsetDateTime) -> Result<OffsetDateTime> {
        now.checked_add(self.config.lookahead).ok_or_else(|| {
            PkiError::generation(format!(
                "lookahead of {} is out of range",
                self.config.lookahead
            ))
        })
    }

    /// Run one rotation pass over `bundle` for `hostname` at `now`
    ///
    /// # Errors
    ///
    /// * `EmptyArtifact` / `MalformedArtifact` if the CA validates but cannot
    ///   be rebuilt for leaf-only rotation
    /// * `CryptoGenerationFailure` if key generation or signing fails, or if
    ///   the validity window or lookahead falls outside the representable
    ///   date range
    pub fn rotate(
        &self,
        bundle: &ArtifactBundle,
        hostname: &str,
        now: OffsetDateTime,
    ) -> Result<RotationOutcome> {
        let window = ValidityWindow::starting_at(now, self.config.backdate, self.config.validity)?;
        self.lookahead_from(now)?;

        let (rotation, next) = if !self.ca_is_valid(bundle, now) {
            info!(
                ca = %self.config.ca_name,
                hostname = %hostname,
                "rotating CA and leaf certificates"
            );
            let ca = issue_ca(
                &window,
                &self.config.ca_name,
                &self.config.ca_organization,
                self.config.key_algorithm,
            )?;
            let leaf = issue_leaf(&ca, &window, hostname, self.config.key_algorithm)?;
            (Rotation::CaAndLeaf, ArtifactBundle::from_artifacts(&ca, &leaf))
        } else if !self.leaf_is_valid(bundle, hostname, now) {
            info!(hostname = %hostname, "rotating leaf certificate");
            let ca = KeyPairArtifacts::from_pem(&bundle.ca_cert, &bundle.ca_key)?;
            let leaf = issue_leaf(&ca, &window, hostname, self.config.key_algorithm)?;
            let next = ArtifactBundle {
                ca_cert: bundle.ca_cert.clone(),
                ca_key: bundle.ca_key.clone(),
                leaf_cert: leaf.cert_pem().as_bytes().to_vec(),
                leaf_key: leaf.key_pem().as_bytes().to_vec(),
            };
            (Rotation::Leaf, next)
        } else {
            debug!(hostname = %hostname, "no rotation needed");
            (Rotation::None, bundle.clone())
        };

        let restart_requested =
            rotation != Rotation::None && self.config.restart_policy == RestartPolicy::OnRotation;

        Ok(RotationOutcome {
            rotation,
            bundle: next,
            restart_requested,
        })
    }
}

/// Errors from [`rotate_store`]
#[derive(Debug, thiserror::Error)]
pub enum RotateError<E: std::error::Error + 'static> {
    /// Rotation pass failed
    #[error("rotation failed: {0}")]
    Pki(#[from] PkiError),

    /// Store load or save failed
    #[error("artifact store error: {0}")]
    Store(#[source] E),
}

/// Load a snapshot from `store`, run one pass, and save the result if it changed
///
/// Performs exactly one `save` of the full bundle when anything rotated and
/// none otherwise. On failure the store is left untouched.
pub fn rotate_store<S: ArtifactStore + ?Sized>(
    engine: &RotationEngine,
    store: &S,
    hostname: &str,
    now: OffsetDateTime,
) -> std::result::Result<RotationOutcome, RotateError<S::Error>> {
    let bundle = ArtifactBundle::load(store).map_err(RotateError::Store)?;
    let outcome = engine.rotate(&bundle, hostname, now)?;
    if outcome.rotated() {
        store.save(&outcome.bundle).map_err(RotateError::Store)?;
        info!(rotation = %outcome.rotation, "saved rotated artifacts");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryArtifactStore;

    const HOST: &str = "webhook.system.svc";

    fn engine() -> RotationEngine {
        RotationEngine::new(RotationConfig {
            key_algorithm: KeyAlgorithm::EcdsaP256,
            ..RotationConfig::default()
        })
    }

    #[test]
    fn defaults_rotate_ten_year_certs_ninety_days_early() {
        let config = RotationConfig::default();
        assert_eq!(config.ca_name, "webhook-ca");
        assert_eq!(config.validity, Duration::days(3650));
        assert_eq!(config.lookahead, Duration::days(90));
        assert_eq!(config.backdate, Duration::hours(1));
        assert_eq!(config.key_algorithm, KeyAlgorithm::Rsa2048);
        assert!(config.verify_ca_hostname);
        assert_eq!(config.restart_policy, RestartPolicy::Never);
    }

    #[test]
    fn empty_bundle_issues_everything() {
        let now = OffsetDateTime::now_utc();
        let outcome = engine()
            .rotate(&ArtifactBundle::default(), HOST, now)
            .expect("rotation should succeed");

        assert_eq!(outcome.rotation, Rotation::CaAndLeaf);
        assert!(outcome.rotated());
        assert!(!outcome.restart_requested);
        assert!(!outcome.bundle.ca_cert.is_empty());
        assert!(!outcome.bundle.leaf_key.is_empty());
        assert!(engine().leaf_is_valid(&outcome.bundle, HOST, now));
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let now = OffsetDateTime::now_utc();
        let first = engine()
            .rotate(&ArtifactBundle::default(), HOST, now)
            .expect("first rotation should succeed");
        let second = engine()
            .rotate(&first.bundle, HOST, now)
            .expect("second rotation should succeed");

        assert_eq!(second.rotation, Rotation::None);
        assert_eq!(second.bundle, first.bundle);
    }

    #[test]
    fn hostname_change_reissues_only_the_leaf() {
        let now = OffsetDateTime::now_utc();
        let first = engine()
            .rotate(&ArtifactBundle::default(), HOST, now)
            .expect("first rotation should succeed");
        let second = engine()
            .rotate(&first.bundle, "other.system.svc", now)
            .expect("second rotation should succeed");

        assert_eq!(second.rotation, Rotation::Leaf);
        assert_eq!(second.bundle.ca_cert, first.bundle.ca_cert);
        assert_eq!(second.bundle.ca_key, first.bundle.ca_key);
        assert_ne!(second.bundle.leaf_cert, first.bundle.leaf_cert);
    }

    #[test]
    fn garbage_ca_triggers_full_rotation() {
        let bundle = ArtifactBundle {
            ca_cert: b"garbage".to_vec(),
            ca_key: b"garbage".to_vec(),
            leaf_cert: b"garbage".to_vec(),
            leaf_key: b"garbage".to_vec(),
        };
        let outcome = engine()
            .rotate(&bundle, HOST, OffsetDateTime::now_utc())
            .expect("rotation should succeed");
        assert_eq!(outcome.rotation, Rotation::CaAndLeaf);
    }

    #[test]
    fn ca_self_check_can_be_disabled() {
        let now = OffsetDateTime::now_utc();
        let issued = engine()
            .rotate(&ArtifactBundle::default(), HOST, now)
            .expect("rotation should succeed");

        // Same CA judged by an engine expecting a different CA name
        let strict = RotationEngine::new(RotationConfig {
            ca_name: "renamed-ca".to_string(),
            key_algorithm: KeyAlgorithm::EcdsaP256,
            ..RotationConfig::default()
        });
        assert!(!strict.ca_is_valid(&issued.bundle, now));

        let lenient = RotationEngine::new(RotationConfig {
            ca_name: "renamed-ca".to_string(),
            verify_ca_hostname: false,
            key_algorithm: KeyAlgorithm::EcdsaP256,
            ..RotationConfig::default()
        });
        assert!(lenient.ca_is_valid(&issued.bundle, now));
    }

    #[test]
    fn restart_is_requested_only_on_rotation() {
        let engine = RotationEngine::new(RotationConfig {
            key_algorithm: KeyAlgorithm::EcdsaP256,
            restart_policy: RestartPolicy::OnRotation,
            ..RotationConfig::default()
        });
        let now = OffsetDateTime::now_utc();

        let first = engine
            .rotate(&ArtifactBundle::default(), HOST, now)
            .expect("rotation should succeed");
        assert!(first.restart_requested);

        let second = engine
            .rotate(&first.bundle, HOST, now)
            .expect("rotation should succeed");
        assert!(!second.restart_requested);
    }

    #[test]
    fn missing_leaf_reuses_the_ca() {
        let now = OffsetDateTime::now_utc();
        let first = engine()
            .rotate(&ArtifactBundle::default(), HOST, now)
            .expect("rotation should succeed");

        let mut bundle = first.bundle.clone();
        bundle.leaf_cert.clear();
        let outcome = engine()
            .rotate(&bundle, HOST, now)
            .expect("rotation should succeed");
        assert_eq!(outcome.rotation, Rotation::Leaf);
        assert_eq!(outcome.bundle.ca_cert, first.bundle.ca_cert);
    }

    #[test]
    fn rotate_store_saves_once_per_change() {
        let store = MemoryArtifactStore::new();
        let now = OffsetDateTime::now_utc();

        let first = rotate_store(&engine(), &store, HOST, now).expect("rotation should succeed");
        assert_eq!(first.rotation, Rotation::CaAndLeaf);
        assert_eq!(store.save_count(), 1);

        let second = rotate_store(&engine(), &store, HOST, now).expect("rotation should succeed");
        assert_eq!(second.rotation, Rotation::None);
        assert_eq!(store.save_count(), 1);

        let stored = ArtifactBundle::load(&store).expect("memory store never fails");
        assert_eq!(stored, first.bundle);
    }

    #[test]
    fn out_of_range_validity_fails_the_pass() {
        let engine = RotationEngine::new(RotationConfig {
            validity: Duration::days(3_000_000),
            key_algorithm: KeyAlgorithm::EcdsaP256,
            ..RotationConfig::default()
        });
        let err = engine
            .rotate(&ArtifactBundle::default(), HOST, OffsetDateTime::now_utc())
            .expect_err("rotation should fail");
        assert!(matches!(err, PkiError::CryptoGenerationFailure(_)));
    }

    #[test]
    fn out_of_range_lookahead_fails_without_touching_the_store() {
        let store = MemoryArtifactStore::new();
        let now = OffsetDateTime::now_utc();
        let issued = rotate_store(&engine(), &store, HOST, now).expect("rotation should succeed");

        let engine = RotationEngine::new(RotationConfig {
            lookahead: Duration::days(3_000_000),
            key_algorithm: KeyAlgorithm::EcdsaP256,
            ..RotationConfig::default()
        });
        assert!(!engine.ca_is_valid(&issued.bundle, now));

        match rotate_store(&engine, &store, HOST, now) {
            Err(RotateError::Pki(PkiError::CryptoGenerationFailure(_))) => {}
            other => panic!("expected CryptoGenerationFailure, got {:?}", other),
        }
        assert_eq!(store.save_count(), 1);
        assert_eq!(
            ArtifactBundle::load(&store).expect("memory store never fails"),
            issued.bundle
        );
    }

    #[test]
    fn rotate_error_wraps_pki_failures() {
        let err: RotateError<std::convert::Infallible> = PkiError::empty("CA key").into();
        assert!(err.to_string().contains("rotation failed"));
    }
}
