//! # capsule-cas
//!
//! Dual-hash content-addressed blob store.
//!
//! Blobs are written with an atomic temp-then-rename discipline into a
//! 2-char fan-out directory layout, with a secondary-hash
//! pointer-indirection layer on top, routed through the
//! [`capsule_fs::Filesystem`] capability instead of raw `std::fs` calls
//! so tests can inject faults at any step.
//!
//! ## Directory layout
//!
//! ```text
//! <root>/
//!   blobs/
//!     blake3/<pp>/<hash>             primary blob, pp = hash[..2]
//!     sha256/<pp>/<hash>.json        pointer: {"blake3": "<primary-hash>"}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use capsule_fs::{Filesystem, OsFilesystem};
use capsule_hash::{HashResult, PRIMARY_NAME, SECONDARY_NAME};
use capsule_support::log_cas_debug;

#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("blob not found: {hash}")]
    NotFound { hash: String },

    #[error("failed to parse pointer file: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, CasError>;

impl capsule_support::ClassifyError for CasError {
    fn kind(&self) -> capsule_support::ErrorKind {
        use capsule_support::ErrorKind;
        match self {
            CasError::Io(_) => ErrorKind::Io,
            CasError::InvalidHash(_) => ErrorKind::InvalidHash,
            CasError::NotFound { .. } => ErrorKind::NotFound,
            CasError::Parse(_) => ErrorKind::Parse,
        }
    }
}

fn check_hash(hash: &str) -> Result<()> {
    if capsule_hash::is_valid_hash(hash) {
        Ok(())
    } else {
        Err(CasError::InvalidHash(hash.to_string()))
    }
}

/// Pointer file body: `{"<primary-name>": "<primary-hash>"}`.
#[derive(Debug, Serialize, Deserialize)]
struct PointerFile {
    #[serde(flatten)]
    entries: BTreeMap<String, String>,
}

/// Content-addressed store rooted at a directory.
pub struct CasStore {
    root: PathBuf,
    fs: Arc<dyn Filesystem>,
}

impl CasStore {
    /// Create a CAS at `root`, using the real filesystem.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::with_filesystem(root, Arc::new(OsFilesystem))
    }

    /// Create a CAS at `root` using a caller-supplied [`Filesystem`]. Used
    /// by tests that need to inject faults into specific operations.
    pub fn with_filesystem<P: AsRef<Path>>(root: P, fs: Arc<dyn Filesystem>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs.mkdir_all(&root)?;
        Ok(Self { root, fs })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    fn primary_blob_path(&self, hash: &str) -> PathBuf {
        self.blobs_dir()
            .join(PRIMARY_NAME)
            .join(&hash[..2])
            .join(hash)
    }

    fn secondary_pointer_path(&self, hash: &str) -> PathBuf {
        self.blobs_dir()
            .join(SECONDARY_NAME)
            .join(&hash[..2])
            .join(format!("{hash}.json"))
    }

    /// Store `data`, returning its primary hash. A no-op (beyond the hash
    /// computation) if the blob is already present — deduplication.
    #[instrument(skip(self, data), level = "debug")]
    pub fn store(&self, data: &[u8]) -> Result<String> {
        let primary = capsule_hash::hash(data);
        self.store_primary_at(&primary, data)?;
        Ok(primary)
    }

    fn store_primary_at(&self, primary: &str, data: &[u8]) -> Result<()> {
        let path = self.primary_blob_path(primary);
        if self.fs.exists(&path) {
            log_cas_debug!("blob already present", hash = primary);
            return Ok(());
        }

        let parent = path.parent().expect("blob path always has a parent");
        self.fs.mkdir_all(parent)?;

        let temp = self.fs.write_temp(parent, primary, data)?;
        match self.fs.rename(&temp, &path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.fs.remove_file_if_exists(&temp);
                if self.fs.exists(&path) {
                    // A concurrent writer of the same bytes won the race.
                    Ok(())
                } else {
                    Err(CasError::Io(e))
                }
            }
        }
    }

    /// Store `data` under both the primary index and a secondary pointer.
    /// The blob write is never rolled back if the pointer write fails —
    /// an orphaned blob is a tolerated, invisible side effect.
    #[instrument(skip(self, data), level = "debug")]
    pub fn store_dual(&self, data: &[u8]) -> Result<HashResult> {
        let result = capsule_hash::dual_hash(data);
        self.store_primary_at(&result.primary, data)?;
        self.write_pointer(&result.secondary, &result.primary)?;
        Ok(result)
    }

    fn write_pointer(&self, secondary: &str, primary: &str) -> Result<()> {
        let path = self.secondary_pointer_path(secondary);
        if self.fs.exists(&path) {
            return Ok(());
        }
        let parent = path.parent().expect("pointer path always has a parent");
        self.fs.mkdir_all(parent)?;

        let mut entries = BTreeMap::new();
        entries.insert(PRIMARY_NAME.to_string(), primary.to_string());
        let body = serde_json::to_vec(&PointerFile { entries })
            .expect("pointer file is always serializable");

        let temp = self.fs.write_temp(parent, secondary, &body)?;
        match self.fs.rename(&temp, &path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.fs.remove_file_if_exists(&temp);
                if self.fs.exists(&path) {
                    Ok(())
                } else {
                    Err(CasError::Io(e))
                }
            }
        }
    }

    /// Retrieve the bytes of the blob with the given primary hash.
    #[instrument(skip(self), level = "debug")]
    pub fn retrieve(&self, primary_hash: &str) -> Result<Vec<u8>> {
        check_hash(primary_hash)?;
        let path = self.primary_blob_path(primary_hash);
        if !self.fs.exists(&path) {
            return Err(CasError::NotFound {
                hash: primary_hash.to_string(),
            });
        }
        Ok(self.fs.read_file(&path)?)
    }

    /// Whether a blob with the given primary hash is present. Returns
    /// `false` (not an error) for malformed hashes.
    pub fn exists(&self, primary_hash: &str) -> bool {
        if !capsule_hash::is_valid_hash(primary_hash) {
            return false;
        }
        self.fs.exists(&self.primary_blob_path(primary_hash))
    }

    /// Resolve a secondary hash to its primary hash via the pointer index.
    #[instrument(skip(self), level = "debug")]
    pub fn lookup_secondary(&self, secondary_hash: &str) -> Result<String> {
        check_hash(secondary_hash)?;
        let path = self.secondary_pointer_path(secondary_hash);
        if !self.fs.exists(&path) {
            return Err(CasError::NotFound {
                hash: secondary_hash.to_string(),
            });
        }
        let bytes = self.fs.read_file(&path)?;
        let pointer: PointerFile =
            serde_json::from_slice(&bytes).map_err(|e| CasError::Parse(e.to_string()))?;
        pointer
            .entries
            .get(PRIMARY_NAME)
            .cloned()
            .ok_or_else(|| CasError::Parse(format!("pointer missing '{PRIMARY_NAME}' key")))
    }

    /// Retrieve a blob's bytes via its secondary hash.
    pub fn retrieve_secondary(&self, secondary_hash: &str) -> Result<Vec<u8>> {
        let primary = self.lookup_secondary(secondary_hash)?;
        self.retrieve(&primary)
    }

    /// Compute statistics by walking the primary blob tree.
    pub fn stats(&self) -> Result<CasStats> {
        let mut blob_count = 0u64;
        let mut total_bytes = 0u64;

        let primary_dir = self.blobs_dir().join(PRIMARY_NAME);
        if !primary_dir.exists() {
            return Ok(CasStats::default());
        }

        for l1 in fs::read_dir(&primary_dir)? {
            let l1 = l1?;
            if !l1.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(l1.path())? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    if entry.path().extension().is_some_and(|e| e == "tmp") {
                        continue;
                    }
                    blob_count += 1;
                    total_bytes += entry.metadata()?.len();
                }
            }
        }

        Ok(CasStats {
            blob_count,
            total_bytes,
        })
    }

    /// Iterate over all primary hashes stored in the CAS.
    pub fn iter(&self) -> Result<CasIterator> {
        let primary_dir = self.blobs_dir().join(PRIMARY_NAME);
        if !primary_dir.exists() {
            return Ok(CasIterator { entries: Vec::new(), pos: 0 });
        }

        let mut entries = Vec::new();
        for l1 in fs::read_dir(&primary_dir)? {
            let l1 = l1?;
            if !l1.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(l1.path())? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                if entry.path().extension().is_some_and(|e| e == "tmp") {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if capsule_hash::is_valid_hash(name) {
                        entries.push(name.to_string());
                    }
                }
            }
        }
        entries.sort();
        Ok(CasIterator { entries, pos: 0 })
    }
}

/// Statistics about the CAS store's primary blob tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct CasStats {
    pub blob_count: u64,
    pub total_bytes: u64,
}

/// Deterministic (sorted) iterator over stored primary hashes.
pub struct CasIterator {
    entries: Vec<String>,
    pos: usize,
}

impl Iterator for CasIterator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let item = self.entries.get(self.pos).cloned();
        self.pos += 1;
        item
    }
}

/// Re-exported so callers of `capsule-cas` don't also need to depend on
/// `capsule-hash` directly for these free functions.
pub use capsule_hash::{dual_hash, hash, is_valid_hash};
