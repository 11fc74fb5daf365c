//! # capsule-fs
//!
//! A single injectable filesystem capability shared by the content-addressed
//! store and the archive codec, replacing scattered direct `std::fs` calls
//! with one small trait: production code is built against [`Filesystem`],
//! real runs use [`OsFilesystem`], and tests that need to exercise a
//! partial-failure path (blob write succeeds, pointer write fails; rename
//! fails mid-unpack) wrap it in [`FaultingFilesystem`].

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Minimal stat result; deliberately not `std::fs::Metadata` so that
/// [`FaultingFilesystem`] can synthesize results without touching disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub is_file: bool,
    pub is_dir: bool,
}

/// The filesystem operations the CAS and archive codec need.
///
/// Every method that can partially fail returns `io::Result` so that
/// callers can apply the same cleanup discipline (e.g. "remove the temp
/// file on any error between create and rename") regardless of which
/// implementation is behind the trait object.
pub trait Filesystem: Send + Sync {
    /// `mkdir -p`.
    fn mkdir_all(&self, path: &Path) -> io::Result<()>;

    /// Create a temp file in `dir` (which must already exist), write `data`
    /// to it, flush and sync it, and return its path. The temp file name is
    /// unique per call so concurrent callers never collide.
    fn write_temp(&self, dir: &Path, name_hint: &str, data: &[u8]) -> io::Result<PathBuf>;

    /// Atomically rename `from` to `to`. On failure, the caller is
    /// responsible for removing `from`; this trait does not hide that
    /// cleanup so callers can decide whether a racing writer already won.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a file, ignoring "not found".
    fn remove_file_if_exists(&self, path: &Path) -> io::Result<()>;

    /// Read an entire file into memory.
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write bytes to a file, overwriting it, creating parent directories
    /// as needed. Not atomic — used for final output artifacts, not for
    /// anything the CAS invariants depend on.
    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Stat a path without following any special integrity assumptions.
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Cheap existence check (does not distinguish file vs directory).
    fn exists(&self, path: &Path) -> bool;
}

/// Production implementation: everything goes straight to the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write_temp(&self, dir: &Path, name_hint: &str, data: &[u8]) -> io::Result<PathBuf> {
        let temp_name = format!(
            "{name_hint}.{}.{:?}.tmp",
            std::process::id(),
            std::thread::current().id()
        );
        let temp_path = dir.join(temp_name);
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(temp_path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file_if_exists(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = fs::metadata(path)?;
        Ok(FileStat {
            len: meta.len(),
            is_file: meta.is_file(),
            is_dir: meta.is_dir(),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Which [`Filesystem`] method a fault should apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    MkdirAll,
    WriteTemp,
    Rename,
    ReadFile,
    WriteFile,
    Stat,
}

/// Wraps a real [`Filesystem`] and fails specific operations on demand.
///
/// Each fault point has a remaining-failure counter; `0` or absent means
/// "never fails" — a single injection boundary instead of one
/// monkey-patch per call site.
pub struct FaultingFilesystem<F: Filesystem> {
    inner: F,
    faults: Mutex<HashMap<FaultPoint, u32>>,
}

impl<F: Filesystem> FaultingFilesystem<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Make `point` fail the next `times` calls (use `u32::MAX` for "always").
    pub fn fail(&self, point: FaultPoint, times: u32) {
        self.faults.lock().unwrap().insert(point, times);
    }

    fn should_fail(&self, point: FaultPoint) -> bool {
        let mut faults = self.faults.lock().unwrap();
        match faults.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn injected_error() -> io::Error {
        io::Error::other("injected fault")
    }
}

impl<F: Filesystem> Filesystem for FaultingFilesystem<F> {
    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        if self.should_fail(FaultPoint::MkdirAll) {
            return Err(Self::injected_error());
        }
        self.inner.mkdir_all(path)
    }

    fn write_temp(&self, dir: &Path, name_hint: &str, data: &[u8]) -> io::Result<PathBuf> {
        if self.should_fail(FaultPoint::WriteTemp) {
            return Err(Self::injected_error());
        }
        self.inner.write_temp(dir, name_hint, data)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if self.should_fail(FaultPoint::Rename) {
            return Err(Self::injected_error());
        }
        self.inner.rename(from, to)
    }

    fn remove_file_if_exists(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_file_if_exists(path)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        if self.should_fail(FaultPoint::ReadFile) {
            return Err(Self::injected_error());
        }
        self.inner.read_file(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        if self.should_fail(FaultPoint::WriteFile) {
            return Err(Self::injected_error());
        }
        self.inner.write_file(path, data)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        if self.should_fail(FaultPoint::Stat) {
            return Err(Self::injected_error());
        }
        self.inner.stat(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }
}
