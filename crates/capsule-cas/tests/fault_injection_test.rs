//! Exercises the partial-failure path: `store_dual`'s blob write
//! succeeding while the pointer write fails is a failure of `store_dual`
//! as a whole, but the blob itself is not rolled back and remains
//! retrievable afterward.

use std::sync::Arc;

use capsule_cas::CasStore;
use capsule_fs::{FaultPoint, FaultingFilesystem, OsFilesystem};
use tempfile::TempDir;

#[test]
fn pointer_write_failure_leaves_an_orphan_blob_but_fails_the_call() {
    let temp = TempDir::new().unwrap();
    let faulting = Arc::new(FaultingFilesystem::new(OsFilesystem));
    let cas = CasStore::with_filesystem(temp.path(), faulting.clone()).unwrap();

    let data = b"orphan-candidate";
    let primary = capsule_hash::hash(data);

    // Store the blob directly first (no fault armed yet) so store_dual's
    // own blob-write step becomes a no-op via deduplication, isolating the
    // pointer-write step as the only remaining write_temp call.
    let direct = cas.store(data).unwrap();
    assert_eq!(direct, primary);

    // Now force the *next* write_temp call (the pointer write) to fail.
    faulting.fail(FaultPoint::WriteTemp, 1);
    let result = cas.store_dual(data);
    assert!(result.is_err(), "pointer write failure must fail store_dual");

    // The blob remains present and retrievable despite the pointer failure.
    assert!(cas.exists(&primary));
    assert_eq!(cas.retrieve(&primary).unwrap(), data);
}

#[test]
fn rename_failure_during_store_is_cleaned_up() {
    let temp = TempDir::new().unwrap();
    let faulting = Arc::new(FaultingFilesystem::new(OsFilesystem));
    let cas = CasStore::with_filesystem(temp.path(), faulting.clone()).unwrap();

    faulting.fail(FaultPoint::Rename, 1);
    let result = cas.store(b"never lands");
    assert!(result.is_err());

    // No stray temp files survive in the store root after the failure.
    let leftover: Vec<_> = walkdir::WalkDir::new(temp.path())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
        .collect();
    assert!(leftover.is_empty(), "temp files must be cleaned up on rename failure");
}
