//! # capsule-archive
//!
//! Packs a capsule directory to a single compressed tar file, and unpacks
//! one back into a capsule directory. The container is plain `tar` wrapped
//! in `xz2`/`flate2` so the result is a portable archive any standard
//! `tar`/`xz`/`gzip` tool can open.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use capsule_cas::CasStore;
use capsule_core::Capsule;
use capsule_manifest::Manifest;
use capsule_support::{log_archive_debug, log_archive_info};

pub const MANIFEST_ENTRY_NAME: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported compression format")]
    Unsupported,

    #[error("manifest missing from archive")]
    NotFound(String),

    #[error("failed to parse manifest: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl capsule_support::ClassifyError for ArchiveError {
    fn kind(&self) -> capsule_support::ErrorKind {
        use capsule_support::ErrorKind;
        match self {
            ArchiveError::Io(_) => ErrorKind::Io,
            ArchiveError::Unsupported => ErrorKind::Unsupported,
            ArchiveError::NotFound(_) => ErrorKind::NotFound,
            ArchiveError::Parse(_) => ErrorKind::Parse,
        }
    }
}

/// Supported archive compression formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Xz,
    Gzip,
}

/// Options controlling [`pack`]. Defaults to XZ.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveOptions {
    pub compression: Compression,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Xz,
        }
    }
}

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];

/// Sniff the first 6 bytes of `path` to determine its compression format.
pub fn detect_compression(path: impl AsRef<Path>) -> Result<Compression> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 6];
    let n = read_up_to(&mut file, &mut header)?;

    if n >= 6 && header == XZ_MAGIC {
        return Ok(Compression::Xz);
    }
    if n >= 2 && header[..2] == GZIP_MAGIC {
        return Ok(Compression::Gzip);
    }
    Err(ArchiveError::Unsupported)
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

/// Pack the capsule rooted at `root` into `output_path` according to
/// `options`. The tar stream contains exactly one `manifest.json` entry
/// (freshly serialized) followed by every file under `root/blobs`, walked
/// in deterministic lexicographic order with paths relative to `root`.
pub fn pack(root: impl AsRef<Path>, output_path: impl AsRef<Path>, options: ArchiveOptions) -> Result<()> {
    let root = root.as_ref();
    let output_path = output_path.as_ref();
    let manifest_bytes = fs::read(root.join(MANIFEST_ENTRY_NAME))?;

    let out_file = File::create(output_path)?;
    match options.compression {
        Compression::Xz => {
            let encoder = xz2::write::XzEncoder::new(out_file, 6);
            let encoder = write_tar(encoder, root, &manifest_bytes)?;
            encoder.finish()?;
        }
        Compression::Gzip => {
            let encoder = flate2::write::GzEncoder::new(out_file, flate2::Compression::best());
            let encoder = write_tar(encoder, root, &manifest_bytes)?;
            encoder.finish()?;
        }
    }

    log_archive_info!("packed capsule", path = %output_path.display());
    Ok(())
}

fn write_tar<W: Write>(writer: W, root: &Path, manifest_bytes: &[u8]) -> Result<W> {
    let mut builder = tar::Builder::new(writer);

    let mut header = tar::Header::new_gnu();
    header.set_size(manifest_bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, MANIFEST_ENTRY_NAME, manifest_bytes)?;

    let blobs_dir = root.join("blobs");
    if blobs_dir.exists() {
        let mut paths: Vec<PathBuf> = WalkDir::new(&blobs_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        for path in paths {
            let relative = path
                .strip_prefix(root)
                .expect("walked path is always under root");
            builder.append_path_with_name(&path, relative)?;
        }
    }

    Ok(builder.into_inner()?)
}

/// Unpack `archive_path` into `dest_dir`, creating it if necessary, and
/// return the resulting capsule bound to `dest_dir`. Entries whose name
/// contains a `..` component are silently skipped.
pub fn unpack(archive_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<Capsule> {
    let archive_path = archive_path.as_ref();
    let dest_dir = dest_dir.as_ref();
    fs::create_dir_all(dest_dir)?;

    let compression = detect_compression(archive_path)?;
    let file = File::open(archive_path)?;

    match compression {
        Compression::Xz => {
            let decoder = xz2::read::XzDecoder::new(file);
            extract_entries(decoder, dest_dir)?;
        }
        Compression::Gzip => {
            let decoder = flate2::read::GzDecoder::new(file);
            extract_entries(decoder, dest_dir)?;
        }
    }

    let manifest_path = dest_dir.join(MANIFEST_ENTRY_NAME);
    let manifest_bytes = fs::read(&manifest_path)
        .map_err(|_| ArchiveError::NotFound(MANIFEST_ENTRY_NAME.to_string()))?;
    let manifest =
        Manifest::from_bytes(&manifest_bytes).map_err(|e| ArchiveError::Parse(e.to_string()))?;

    let cas = CasStore::new(dest_dir).map_err(|e| ArchiveError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
    log_archive_debug!("unpacked capsule", path = %dest_dir.display());
    Ok(Capsule::from_parts(dest_dir.to_path_buf(), cas, manifest))
}

fn extract_entries<R: Read>(reader: R, dest_dir: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_path_buf();

        if name.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            continue;
        }

        let full = dest_dir.join(&name);
        let header_type = entry.header().entry_type();

        if header_type.is_dir() {
            fs::create_dir_all(&full)?;
            continue;
        }
        if header_type.is_file() {
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&full)?;
            io::copy(&mut entry, &mut out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_capsule(root: &Path) -> Capsule {
        let mut capsule = Capsule::new(root).unwrap();
        let file_path = root.join("input.txt");
        fs::write(&file_path, "archive me").unwrap();
        capsule.ingest_file(&file_path).unwrap();
        capsule.save_manifest().unwrap();
        capsule
    }

    #[test]
    fn pack_and_unpack_xz_roundtrips() {
        let src = TempDir::new().unwrap();
        make_capsule(src.path());

        let archive_dir = TempDir::new().unwrap();
        let archive_path = archive_dir.path().join("capsule.tar.xz");
        pack(src.path(), &archive_path, ArchiveOptions::default()).unwrap();

        let dest = TempDir::new().unwrap();
        let unpacked = unpack(&archive_path, dest.path()).unwrap();
        assert_eq!(unpacked.manifest().artifacts.len(), 1);
    }

    #[test]
    fn pack_and_unpack_gzip_roundtrips() {
        let src = TempDir::new().unwrap();
        make_capsule(src.path());

        let archive_dir = TempDir::new().unwrap();
        let archive_path = archive_dir.path().join("capsule.tar.gz");
        pack(
            src.path(),
            &archive_path,
            ArchiveOptions {
                compression: Compression::Gzip,
            },
        )
        .unwrap();

        let dest = TempDir::new().unwrap();
        let unpacked = unpack(&archive_path, dest.path()).unwrap();
        assert_eq!(unpacked.manifest().artifacts.len(), 1);

        let artifact = unpacked.manifest().artifacts.values().next().unwrap();
        let bytes = unpacked
            .cas()
            .retrieve(&artifact.primary_hash)
            .unwrap();
        assert_eq!(bytes, b"archive me");
    }

    #[test]
    fn detect_compression_identifies_both_formats() {
        let src = TempDir::new().unwrap();
        make_capsule(src.path());
        let archive_dir = TempDir::new().unwrap();

        let xz_path = archive_dir.path().join("a.tar.xz");
        pack(src.path(), &xz_path, ArchiveOptions::default()).unwrap();
        assert_eq!(detect_compression(&xz_path).unwrap(), Compression::Xz);

        let gz_path = archive_dir.path().join("a.tar.gz");
        pack(
            src.path(),
            &gz_path,
            ArchiveOptions {
                compression: Compression::Gzip,
            },
        )
        .unwrap();
        assert_eq!(detect_compression(&gz_path).unwrap(), Compression::Gzip);
    }

    #[test]
    fn detect_compression_rejects_unknown_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-an-archive.bin");
        fs::write(&path, b"plain text, not an archive").unwrap();
        assert!(matches!(detect_compression(&path), Err(ArchiveError::Unsupported)));
    }

    #[test]
    fn unpack_missing_manifest_fails() {
        let archive_dir = TempDir::new().unwrap();
        let archive_path = archive_dir.path().join("empty.tar.xz");
        {
            let out_file = File::create(&archive_path).unwrap();
            let encoder = xz2::write::XzEncoder::new(out_file, 6);
            let mut builder = tar::Builder::new(encoder);
            builder.finish().unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = TempDir::new().unwrap();
        let err = unpack(&archive_path, dest.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
    }

    #[test]
    fn path_traversal_entries_are_skipped() {
        let src = TempDir::new().unwrap();
        make_capsule(src.path());

        let archive_dir = TempDir::new().unwrap();
        let archive_path = archive_dir.path().join("hostile.tar.xz");
        {
            let out_file = File::create(&archive_path).unwrap();
            let encoder = xz2::write::XzEncoder::new(out_file, 6);
            let mut builder = tar::Builder::new(encoder);

            let manifest_bytes = fs::read(src.path().join(MANIFEST_ENTRY_NAME)).unwrap();
            let mut header = tar::Header::new_gnu();
            header.set_size(manifest_bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, MANIFEST_ENTRY_NAME, manifest_bytes.as_slice())
                .unwrap();

            let evil_bytes = b"uh oh";
            let mut evil_header = tar::Header::new_gnu();
            evil_header.set_size(evil_bytes.len() as u64);
            evil_header.set_mode(0o644);
            evil_header.set_cksum();
            builder
                .append_data(&mut evil_header, "../../etc/evil", &evil_bytes[..])
                .unwrap();

            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = TempDir::new().unwrap();
        let unpacked = unpack(&archive_path, dest.path()).unwrap();
        assert_eq!(unpacked.manifest().artifacts.len(), 1);
        assert!(!dest.path().parent().unwrap().join("etc").exists());
    }
}
