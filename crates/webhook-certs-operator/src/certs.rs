//! Certificates mounted into the webhook server's pod
//!
//! The mounted secret directory is an [`ArtifactStore`]: one file per
//! artifact, named by [`ArtifactKey::name`].

use std::io;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use webhook_certs_pki::{ArtifactBundle, ArtifactKey, ArtifactStore, RotationEngine};

/// Whether the serving certificate is present in `cert_dir`
pub fn certs_mounted(cert_dir: &Path) -> bool {
    cert_dir.join(ArtifactKey::LeafCert.name()).is_file()
}

/// Artifact store over a directory of PEM files
#[derive(Debug, Clone)]
pub struct CertDir {
    path: PathBuf,
}

impl CertDir {
    /// Store rooted at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Directory holding the artifacts
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArtifactStore for CertDir {
    type Error = io::Error;

    fn load(&self, key: ArtifactKey) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.path.join(key.name())) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stages all four files before renaming any into place, so no artifact
    /// is ever half-written
    fn save(&self, bundle: &ArtifactBundle) -> io::Result<()> {
        std::fs::create_dir_all(&self.path)?;
        let mut staged = Vec::with_capacity(ArtifactKey::ALL.len());
        for (name, value) in bundle.iter() {
            let tmp = self.path.join(format!(".{}.tmp", name));
            std::fs::write(&tmp, value)?;
            staged.push((tmp, self.path.join(name)));
        }
        for (tmp, target) in staged {
            std::fs::rename(tmp, target)?;
        }
        Ok(())
    }
}

/// Read whatever artifacts are mounted in `cert_dir`; missing files are empty
pub fn read_mounted_bundle(cert_dir: &Path) -> io::Result<ArtifactBundle> {
    ArtifactBundle::load(&CertDir::new(cert_dir))
}

/// Result of checking mounted certificates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountedCheck {
    /// `tls.crt` is present
    pub mounted: bool,
    /// The CA would be kept by the next rotation pass
    pub ca_valid: bool,
    /// The leaf would be kept by the next rotation pass
    pub leaf_valid: bool,
}

impl MountedCheck {
    /// Whether the mounted certificates are usable and not due for rotation
    pub fn healthy(&self) -> bool {
        self.mounted && self.ca_valid && self.leaf_valid
    }
}

/// Judge the mounted certificates the way a rotation pass would
pub fn check_mounted(
    cert_dir: &Path,
    engine: &RotationEngine,
    hostname: &str,
    now: OffsetDateTime,
) -> io::Result<MountedCheck> {
    let bundle = read_mounted_bundle(cert_dir)?;
    Ok(MountedCheck {
        mounted: certs_mounted(cert_dir),
        ca_valid: engine.ca_is_valid(&bundle, now),
        leaf_valid: engine.leaf_is_valid(&bundle, hostname, now),
    })
}
