//! Artifact bundle and the artifact store contract
//!
//! The four artifacts (CA cert, CA key, leaf cert, leaf key) are always
//! loaded and saved together. A store never sees a partial write: either
//! the whole bundle is replaced or nothing is.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::artifacts::KeyPairArtifacts;

/// Name of one artifact blob in a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKey {
    /// CA certificate PEM (`ca.crt`)
    CaCert,
    /// CA private key PEM (`ca.key`)
    CaKey,
    /// Leaf certificate PEM (`tls.crt`)
    LeafCert,
    /// Leaf private key PEM (`tls.key`)
    LeafKey,
}

impl ArtifactKey {
    /// Every artifact key, in storage order
    pub const ALL: [ArtifactKey; 4] = [
        ArtifactKey::CaCert,
        ArtifactKey::CaKey,
        ArtifactKey::LeafCert,
        ArtifactKey::LeafKey,
    ];

    /// Storage name of the blob
    pub fn name(self) -> &'static str {
        match self {
            Self::CaCert => "ca.crt",
            Self::CaKey => "ca.key",
            Self::LeafCert => "tls.crt",
            Self::LeafKey => "tls.key",
        }
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of the four stored artifact blobs
///
/// Missing blobs are represented as empty byte vectors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactBundle {
    /// CA certificate PEM
    pub ca_cert: Vec<u8>,
    /// CA private key PEM
    pub ca_key: Vec<u8>,
    /// Leaf certificate PEM
    pub leaf_cert: Vec<u8>,
    /// Leaf private key PEM
    pub leaf_key: Vec<u8>,
}

impl ArtifactBundle {
    /// Bundle built from freshly issued CA and leaf artifacts
    pub fn from_artifacts(ca: &KeyPairArtifacts, leaf: &KeyPairArtifacts) -> Self {
        Self {
            ca_cert: ca.cert_pem().as_bytes().to_vec(),
            ca_key: ca.key_pem().as_bytes().to_vec(),
            leaf_cert: leaf.cert_pem().as_bytes().to_vec(),
            leaf_key: leaf.key_pem().as_bytes().to_vec(),
        }
    }

    /// Build a bundle from named blobs, ignoring unrelated names
    pub fn from_named<'n, 'v, I>(blobs: I) -> Self
    where
        I: IntoIterator<Item = (&'n str, &'v [u8])>,
    {
        let mut bundle = Self::default();
        for (name, value) in blobs {
            if let Some(key) = ArtifactKey::ALL.into_iter().find(|k| k.name() == name) {
                bundle.set(key, value.to_vec());
            }
        }
        bundle
    }

    /// Load a bundle from a store; missing blobs become empty
    pub fn load<S: ArtifactStore + ?Sized>(store: &S) -> Result<Self, S::Error> {
        let mut bundle = Self::default();
        for key in ArtifactKey::ALL {
            if let Some(value) = store.load(key)? {
                bundle.set(key, value);
            }
        }
        Ok(bundle)
    }

    /// Blob stored under `key`
    pub fn get(&self, key: ArtifactKey) -> &[u8] {
        match key {
            ArtifactKey::CaCert => &self.ca_cert,
            ArtifactKey::CaKey => &self.ca_key,
            ArtifactKey::LeafCert => &self.leaf_cert,
            ArtifactKey::LeafKey => &self.leaf_key,
        }
    }

    /// Replace the blob stored under `key`
    pub fn set(&mut self, key: ArtifactKey, value: Vec<u8>) {
        match key {
            ArtifactKey::CaCert => self.ca_cert = value,
            ArtifactKey::CaKey => self.ca_key = value,
            ArtifactKey::LeafCert => self.leaf_cert = value,
            ArtifactKey::LeafKey => self.leaf_key = value,
        }
    }

    /// Named blobs, in storage order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &[u8])> {
        ArtifactKey::ALL
            .into_iter()
            .map(move |key| (key.name(), self.get(key)))
    }

    /// Whether every blob is empty
    pub fn is_empty(&self) -> bool {
        ArtifactKey::ALL.into_iter().all(|key| self.get(key).is_empty())
    }
}

/// Persistent home of the artifact bundle
///
/// `save` always receives the complete bundle and must write all four blobs
/// together. The operator's Secret-backed store is async and sits behind its
/// Kubernetes client, saving the same [`ArtifactBundle`] in a single replace;
/// this trait covers synchronous stores such as a directory of PEM files.
pub trait ArtifactStore {
    /// Store-specific error
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load one blob; `Ok(None)` if it does not exist
    fn load(&self, key: ArtifactKey) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Replace the whole bundle
    fn save(&self, bundle: &ArtifactBundle) -> Result<(), Self::Error>;
}

/// In-process artifact store
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: Mutex<BTreeMap<ArtifactKey, Vec<u8>>>,
    saves: AtomicUsize,
}

impl MemoryArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `bundle`
    pub fn with_bundle(bundle: &ArtifactBundle) -> Self {
        let store = Self::new();
        store.replace(bundle);
        store
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn replace(&self, bundle: &ArtifactBundle) {
        let mut blobs = self.blobs.lock();
        blobs.clear();
        for key in ArtifactKey::ALL {
            let value = bundle.get(key);
            if !value.is_empty() {
                blobs.insert(key, value.to_vec());
            }
        }
    }
}

impl ArtifactStore for MemoryArtifactStore {
    type Error = std::convert::Infallible;

    fn load(&self, key: ArtifactKey) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.blobs.lock().get(&key).cloned())
    }

    fn save(&self, bundle: &ArtifactBundle) -> Result<(), Self::Error> {
        self.replace(bundle);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
