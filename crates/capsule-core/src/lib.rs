//! # capsule-core
//!
//! A `Capsule` pairs one [`capsule_cas::CasStore`] rooted at a directory
//! with one in-memory [`capsule_manifest::Manifest`] serializable under the
//! same directory. All operations are synchronous and single-threaded per
//! instance: a thin struct wrapping the lower CAS and manifest crates
//! behind a crate-local error enum.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::instrument;

use capsule_cas::{CasError, CasStore};
use capsule_manifest::{
    kind, Artifact, BlobRecord, CommandDescriptor, IrRecord, Manifest, ManifestError, Run,
    RunOutputs,
};
use capsule_support::{log_capsule_debug, log_capsule_info, ClassifyError, ErrorKind};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum CapsuleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cas(#[from] CasError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, CapsuleError>;

impl ClassifyError for CapsuleError {
    fn kind(&self) -> ErrorKind {
        match self {
            CapsuleError::Io(_) => ErrorKind::Io,
            CapsuleError::Cas(e) => e.kind(),
            CapsuleError::Manifest(e) => e.kind(),
            CapsuleError::NotFound(_) => ErrorKind::NotFound,
            CapsuleError::Invalid(_) => ErrorKind::Invalid,
            CapsuleError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }
}

/// Export mode for [`Capsule::export`]/[`Capsule::export_to_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportMode {
    /// Return the blob's bytes exactly as stored.
    Identity,
    /// Reserved for extensions; always fails with `Unsupported` in the core.
    Derived,
}

impl Default for ExportMode {
    fn default() -> Self {
        ExportMode::Identity
    }
}

/// Binds a CAS and a manifest rooted at the same directory.
pub struct Capsule {
    root: PathBuf,
    cas: CasStore,
    manifest: Manifest,
}

impl Capsule {
    /// Create a capsule rooted at `root`: creates the CAS directory and
    /// starts from an empty manifest.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let cas = CasStore::new(&root)?;
        Ok(Self {
            root,
            cas,
            manifest: Manifest::new(),
        })
    }

    /// Build a capsule from an already-open CAS and an already-loaded
    /// manifest. Used by the archive codec after unpacking.
    pub fn from_parts(root: PathBuf, cas: CasStore, manifest: Manifest) -> Self {
        Self { root, cas, manifest }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cas(&self) -> &CasStore {
        &self.cas
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn manifest_mut(&mut self) -> &mut Manifest {
        &mut self.manifest
    }

    /// Read `path`, store its bytes dual-hashed, and record a new artifact.
    /// Idempotent at the blob level (one blob per distinct content) but not
    /// at the artifact level: ingesting identical bytes twice yields two
    /// distinct artifacts sharing one blob.
    #[instrument(skip(self), level = "debug")]
    pub fn ingest_file<P: AsRef<Path>>(&mut self, path: P) -> Result<Artifact> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let size = data.len() as u64;
        let mime_type = guess_mime(path);

        let hashes = self.cas.store_dual(&data)?;

        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let id = self.fresh_artifact_id(&basename);

        let artifact = Artifact {
            id: id.clone(),
            original_name: basename,
            kind: kind::FILE.to_string(),
            primary_hash: hashes.primary.clone(),
            secondary_hash: Some(hashes.secondary.clone()),
            metadata: Default::default(),
        };

        self.manifest.artifacts.insert(id.clone(), artifact.clone());
        self.manifest.blobs.insert(
            hashes.primary.clone(),
            BlobRecord {
                primary_hash: hashes.primary,
                secondary_hash: Some(hashes.secondary),
                size,
                mime_type,
            },
        );

        log_capsule_info!("ingested artifact", id = %id, size = size);
        Ok(artifact)
    }

    /// Serialize `corpus_value`, store it dual-hashed, create an IR
    /// artifact, and link it to `source_artifact_id`.
    pub fn store_ir(
        &mut self,
        corpus_value: &serde_json::Value,
        source_artifact_id: &str,
    ) -> Result<Artifact> {
        let bytes = serde_json::to_vec(corpus_value)
            .map_err(|e| CapsuleError::Invalid(format!("IR value not serializable: {e}")))?;
        let hashes = self.cas.store_dual(&bytes)?;

        let id = self.fresh_artifact_id(&format!("{source_artifact_id}-ir"));
        let artifact = Artifact {
            id: id.clone(),
            original_name: String::new(),
            kind: kind::IR.to_string(),
            primary_hash: hashes.primary.clone(),
            secondary_hash: Some(hashes.secondary.clone()),
            metadata: Default::default(),
        };

        self.manifest.artifacts.insert(id.clone(), artifact.clone());
        self.manifest.blobs.insert(
            hashes.primary.clone(),
            BlobRecord {
                primary_hash: hashes.primary,
                secondary_hash: Some(hashes.secondary),
                size: bytes.len() as u64,
                mime_type: Some("application/json".to_string()),
            },
        );
        self.manifest.insert_ir_record(
            source_artifact_id.to_string(),
            IrRecord {
                source_artifact_id: source_artifact_id.to_string(),
                ir_blob_primary_hash: artifact.primary_hash.clone(),
            },
        );

        Ok(artifact)
    }

    /// Load and deserialize the IR value for `artifact_id`. Fails with
    /// `NotFound` if the artifact is absent, `Invalid` if it is not an IR
    /// artifact, `Manifest`/`Cas` errors propagate as-is on parse/read
    /// failure.
    pub fn load_ir(&self, artifact_id: &str) -> Result<serde_json::Value> {
        let artifact = self
            .manifest
            .artifacts
            .get(artifact_id)
            .ok_or_else(|| CapsuleError::NotFound(format!("artifact '{artifact_id}'")))?;

        if artifact.kind != kind::IR {
            return Err(CapsuleError::Invalid(format!(
                "artifact '{artifact_id}' has kind '{}', not '{}'",
                artifact.kind,
                kind::IR
            )));
        }

        let bytes = self.cas.retrieve(&artifact.primary_hash)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CapsuleError::Manifest(ManifestError::Parse(e.to_string())))
    }

    /// Store a run's transcript and attach the run to the manifest. `run`'s
    /// `outputs.transcript_hash` is overwritten with the transcript's
    /// primary hash.
    pub fn add_run(&mut self, mut run: Run, transcript_bytes: &[u8]) -> Result<Run> {
        if run.id.is_empty() {
            return Err(CapsuleError::Invalid("run.id must be non-empty".to_string()));
        }
        let primary = self.cas.store(transcript_bytes)?;
        run.outputs.transcript_hash = Some(primary);
        self.manifest.insert_run(run.clone());
        log_capsule_debug!("recorded run", id = %run.id);
        Ok(run)
    }

    /// Export an artifact's bytes to `target_path`, creating parent
    /// directories as needed and overwriting any existing file.
    pub fn export<P: AsRef<Path>>(
        &self,
        artifact_id: &str,
        mode: ExportMode,
        target_path: P,
    ) -> Result<()> {
        let bytes = self.export_to_bytes(artifact_id, mode)?;
        let target_path = target_path.as_ref();
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target_path, bytes)?;
        Ok(())
    }

    /// Export an artifact's bytes in-memory.
    pub fn export_to_bytes(&self, artifact_id: &str, mode: ExportMode) -> Result<Vec<u8>> {
        match mode {
            ExportMode::Derived => Err(CapsuleError::Unsupported(
                "DERIVED export mode is not implemented in the core".to_string(),
            )),
            ExportMode::Identity => {
                let artifact = self
                    .manifest
                    .artifacts
                    .get(artifact_id)
                    .ok_or_else(|| CapsuleError::NotFound(format!("artifact '{artifact_id}'")))?;
                Ok(self.cas.retrieve(&artifact.primary_hash)?)
            }
        }
    }

    /// Serialize the manifest to `<root>/manifest.json`.
    pub fn save_manifest(&self) -> Result<()> {
        let path = self.root.join(MANIFEST_FILE_NAME);
        fs::write(path, self.manifest.to_bytes())?;
        Ok(())
    }

    /// Retrieve a run's transcript bytes.
    pub fn get_transcript(&self, run_id: &str) -> Result<Vec<u8>> {
        let runs = self
            .manifest
            .runs
            .as_ref()
            .ok_or_else(|| CapsuleError::NotFound(format!("run '{run_id}'")))?;
        let run = runs
            .get(run_id)
            .ok_or_else(|| CapsuleError::NotFound(format!("run '{run_id}'")))?;
        let hash = run
            .outputs
            .transcript_hash
            .as_ref()
            .ok_or_else(|| CapsuleError::NotFound(format!("run '{run_id}' has no transcript")))?;
        Ok(self.cas.retrieve(hash)?)
    }

    /// Look up the IR extraction record for a source artifact.
    pub fn get_ir_record(&self, source_artifact_id: &str) -> Result<IrRecord> {
        self.manifest
            .ir_extractions
            .as_ref()
            .and_then(|m| m.get(source_artifact_id))
            .cloned()
            .ok_or_else(|| {
                CapsuleError::NotFound(format!(
                    "no IR extraction recorded for '{source_artifact_id}'"
                ))
            })
    }

    /// Generate a capsule-unique artifact ID derived from `basename`:
    /// sanitized to `[A-Za-z0-9._:-]`, `"artifact"` if that leaves nothing,
    /// collisions resolved by appending `-<n>`.
    fn fresh_artifact_id(&self, basename: &str) -> String {
        let sanitized = sanitize_artifact_id(basename);
        if !self.manifest.artifacts.contains_key(&sanitized) {
            return sanitized;
        }
        let mut n = 2u32;
        loop {
            let candidate = format!("{sanitized}-{n}");
            if !self.manifest.artifacts.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn sanitize_artifact_id(basename: &str) -> String {
    let sanitized: String = basename
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
        .collect();
    if sanitized.is_empty() {
        "artifact".to_string()
    } else {
        sanitized
    }
}

/// Minimal extension-based MIME hint. Good enough for manifest metadata;
/// not a replacement for real content sniffing, which belongs to an
/// external format plugin.
fn guess_mime(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" => "text/plain",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "rtf" => "application/rtf",
        "pdb" => "application/x-pilot",
        "sfm" => "text/x-sfm",
        "db" => "application/octet-stream",
        _ => return None,
    };
    Some(mime.to_string())
}
