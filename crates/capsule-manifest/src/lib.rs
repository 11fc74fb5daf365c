//! # capsule-manifest
//!
//! The capsule index: a typed, JSON-serializable record of artifacts,
//! blobs, runs, and IR extractions within a capsule.
//!
//! Every map-shaped field uses `BTreeMap` rather than `HashMap`. That's
//! what gives `to_bytes`/`from_bytes` their byte-stability guarantee
//! (sorted keys, fixed indent) without a separate canonicalization pass —
//! `serde_json`'s `BTreeMap` serialization already walks keys in sorted
//! order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current capsule manifest format version.
pub const CAPSULE_VERSION: &str = "1";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to parse manifest: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

impl capsule_support::ClassifyError for ManifestError {
    fn kind(&self) -> capsule_support::ErrorKind {
        match self {
            ManifestError::Parse(_) => capsule_support::ErrorKind::Parse,
        }
    }
}

/// A named, typed reference to a single stored blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(default)]
    pub original_name: String,
    pub kind: String,
    pub primary_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_hash: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Artifact kind tags used throughout the workspace.
pub mod kind {
    pub const FILE: &str = "file";
    pub const IR: &str = "ir";
}

/// Manifest-level metadata about a stored blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub primary_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_hash: Option<String>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A command descriptor attached to a [`Run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub profile: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Outputs recorded for a [`Run`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_hash: Option<String>,
}

/// A record of an external tool execution attached to a capsule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub plugin_id: String,
    #[serde(default)]
    pub input_artifact_ids: Vec<String>,
    pub command: CommandDescriptor,
    pub status: String,
    #[serde(default)]
    pub outputs: RunOutputs,
}

/// A link from a source artifact to an extracted-IR artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrRecord {
    pub source_artifact_id: String,
    pub ir_blob_primary_hash: String,
}

/// The capsule index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub capsule_version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,
    #[serde(default)]
    pub blobs: BTreeMap<String, BlobRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<BTreeMap<String, Run>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ir_extractions: Option<BTreeMap<String, IrRecord>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Manifest {
    /// A fresh, empty manifest stamped with the current time.
    pub fn new() -> Self {
        Self {
            capsule_version: CAPSULE_VERSION.to_string(),
            created_at: Utc::now(),
            artifacts: BTreeMap::new(),
            blobs: BTreeMap::new(),
            runs: None,
            ir_extractions: None,
            labels: BTreeMap::new(),
        }
    }

    /// Serialize to a stable, indented, key-ordered JSON byte sequence
    /// suitable for archival and for hashing.
    pub fn to_bytes(&self) -> Vec<u8> {
        // `serde_json::to_vec_pretty` + `BTreeMap` fields together give a
        // deterministic byte sequence for identical manifests: 2-space
        // indentation and keys walked in sorted order.
        serde_json::to_vec_pretty(self).expect("Manifest is always serializable")
    }

    /// Parse a manifest from bytes. Fails with [`ManifestError::Parse`] if
    /// the JSON is malformed or the (required) `capsule_version` field is
    /// absent.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ManifestError::Parse(e.to_string()))
    }

    /// Insert or replace a run, creating the runs map if it is absent.
    pub fn insert_run(&mut self, run: Run) {
        self.runs.get_or_insert_with(BTreeMap::new).insert(run.id.clone(), run);
    }

    /// Insert or replace an IR extraction record, creating the map if absent.
    pub fn insert_ir_record(&mut self, source_artifact_id: String, record: IrRecord) {
        self.ir_extractions
            .get_or_insert_with(BTreeMap::new)
            .insert(source_artifact_id, record);
    }

    /// Look up a free-form label.
    pub fn get_label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Set a free-form label.
    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_manifest_is_empty_and_versioned() {
        let m = Manifest::new();
        assert_eq!(m.capsule_version, CAPSULE_VERSION);
        assert!(m.artifacts.is_empty());
        assert!(m.blobs.is_empty());
        assert!(m.runs.is_none());
    }

    #[test]
    fn roundtrips_through_bytes() {
        let mut m = Manifest::new();
        m.artifacts.insert(
            "hello".to_string(),
            Artifact {
                id: "hello".to_string(),
                original_name: "hello.txt".to_string(),
                kind: kind::FILE.to_string(),
                primary_hash: "a".repeat(64),
                secondary_hash: None,
                metadata: BTreeMap::new(),
            },
        );
        let bytes = m.to_bytes();
        let parsed = Manifest::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, m);
    }

    #[test]
    fn serialization_is_byte_stable() {
        let m = Manifest::new();
        assert_eq!(m.to_bytes(), m.to_bytes());
    }

    #[test]
    fn malformed_json_fails_to_parse() {
        let err = Manifest::from_bytes(b"{not json").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn missing_version_field_fails_to_parse() {
        let bytes = br#"{"created_at":"2024-01-01T00:00:00Z"}"#;
        let err = Manifest::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn labels_are_settable_and_readable() {
        let mut m = Manifest::new();
        assert_eq!(m.get_label("corpus"), None);
        m.set_label("corpus", "juniper-bible");
        assert_eq!(m.get_label("corpus"), Some("juniper-bible"));
    }

    #[test]
    fn insert_run_creates_map_lazily() {
        let mut m = Manifest::new();
        assert!(m.runs.is_none());
        m.insert_run(Run {
            id: "run-1".to_string(),
            plugin_id: "rtf-tool".to_string(),
            input_artifact_ids: vec!["a1".to_string()],
            command: CommandDescriptor {
                profile: "default".to_string(),
                args: vec![],
            },
            status: "ok".to_string(),
            outputs: RunOutputs::default(),
        });
        assert_eq!(m.runs.as_ref().unwrap().len(), 1);
    }
}
