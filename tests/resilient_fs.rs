use std::fs;
use std::time::{Duration, Instant};

use pe_watch::{ResilientFs, WatchError};

#[test]
fn missing_source_fails_without_retrying() {
    let td = tempfile::tempdir().unwrap();
    let fs_op = ResilientFs::new(Duration::from_secs(5));
    let start = Instant::now();
    let err = fs_op
        .rename(&td.path().join("gone"), &td.path().join("dest"))
        .unwrap_err();
    assert!(matches!(err, WatchError::SourceMissing(_)));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn persistent_failure_ends_in_timeout() {
    let td = tempfile::tempdir().unwrap();
    let src = td.path().join("a.tif");
    fs::write(&src, b"data").unwrap();
    // Destination parent does not exist, so every attempt fails.
    let dest = td.path().join("no").join("such").join("a.tif");

    let fs_op = ResilientFs::new(Duration::from_millis(300)).with_backoff(Duration::from_millis(50));
    let start = Instant::now();
    let err = fs_op.rename(&src, &dest).unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, WatchError::IoTimeout { .. }), "got {err:?}");
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
    assert!(src.exists());
}

#[test]
fn copy_then_remove_tree() {
    let td = tempfile::tempdir().unwrap();
    let src = td.path().join("tree");
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("one"), b"1").unwrap();
    fs::write(src.join("sub").join("two"), b"22").unwrap();

    let fs_op = ResilientFs::default();
    let dest = td.path().join("copy");
    let bytes = fs_op.copy(&src, &dest).unwrap();
    assert_eq!(bytes, 3);
    assert_eq!(fs::read(dest.join("sub").join("two")).unwrap(), b"22");

    fs_op.remove(&src).unwrap();
    assert!(!src.exists());
}
