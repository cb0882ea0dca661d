//! Retry-with-timeout wrappers around rename, copy and recursive delete.
//!
//! Detector PCs export their frames over SMB; a file that was just written is often
//! briefly locked or read-only. Every operation here:
//! - fails at once with `SourceMissing` when the source is absent,
//! - clears read-only attributes on the source,
//! - retries on any OS error with a fixed backoff,
//! - gives up with `IoTimeout` once the elapsed time exceeds the budget.
//!
//! The sleep before each retry is capped by the remaining budget, so a call never
//! blocks much longer than `timeout` plus the duration of one attempt.

use filetime::FileTime;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::config::DEFAULT_FS_TIMEOUT;
use crate::errors::WatchError;
use crate::platform::clear_readonly;

use super::helpers::{build_message, io_error_with_help_io};
use super::util::{fsync_dir, is_cross_device, unique_temp_path};

pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct ResilientFs {
    timeout: Duration,
    backoff: Duration,
}

impl Default for ResilientFs {
    fn default() -> Self {
        Self::new(DEFAULT_FS_TIMEOUT)
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

impl ResilientFs {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn retry<T>(
        &self,
        op: &'static str,
        src: &Path,
        mut attempt: impl FnMut() -> io::Result<T>,
    ) -> Result<T, WatchError> {
        if !exists(src) {
            return Err(WatchError::SourceMissing(src.to_path_buf()));
        }
        let _ = clear_readonly(src);

        let start = Instant::now();
        let mut tries: u32 = 0;
        loop {
            tries += 1;
            let err = match attempt() {
                Ok(v) => {
                    if tries > 1 {
                        debug!(op, path = %src.display(), tries, "succeeded after retry");
                    }
                    return Ok(v);
                }
                Err(e) => e,
            };

            // Someone else took the source while we were retrying.
            if !exists(src) {
                return Err(WatchError::SourceMissing(src.to_path_buf()));
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                let last_error = build_message(op, src, &err);
                warn!(op, path = %src.display(), tries, elapsed_ms = elapsed.as_millis() as u64, error = %last_error, "giving up");
                return Err(WatchError::IoTimeout {
                    op,
                    path: src.to_path_buf(),
                    elapsed_ms: elapsed.as_millis() as u64,
                    last_error,
                });
            }
            trace!(op, path = %src.display(), tries, error = %err, "transient failure; backing off");
            sleep(self.backoff.min(self.timeout - elapsed));
        }
    }

    /// Move `src` to `dest` (file or directory). Falls back to copy + delete across filesystems.
    pub fn rename(&self, src: &Path, dest: &Path) -> Result<(), WatchError> {
        self.retry("move", src, || match fs::rename(src, dest) {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => {
                debug!(src = %src.display(), dest = %dest.display(), "cross-device move; copying");
                copy_any(src, dest)?;
                remove_any(src)
            }
            Err(e) => Err(e),
        })
    }

    /// Copy a file or a directory tree to `dest`, preserving modification times.
    /// Returns the number of bytes copied.
    pub fn copy(&self, src: &Path, dest: &Path) -> Result<u64, WatchError> {
        self.retry("copy", src, || copy_any(src, dest))
    }

    /// Delete a file or a directory tree.
    pub fn remove(&self, path: &Path) -> Result<(), WatchError> {
        self.retry("delete", path, || remove_any(path))
    }
}

fn copy_any(src: &Path, dest: &Path) -> io::Result<u64> {
    let meta = fs::metadata(src)?;
    if !meta.is_dir() {
        return copy_file_atomic(src, dest);
    }
    let mut total = 0u64;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            total += copy_file_atomic(entry.path(), &target)?;
        }
    }
    fs::create_dir_all(dest)?;
    Ok(total)
}

/// Copy into a hidden sibling of `dest`, fsync, then rename into place.
fn copy_file_atomic(src: &Path, dest: &Path) -> io::Result<u64> {
    let dest_dir = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dest_dir).map_err(io_error_with_help_io("create destination", dest_dir))?;

    let tmp = unique_temp_path(dest_dir);
    let copied = match fs::copy(src, &tmp).and_then(|n| File::open(&tmp)?.sync_all().map(|_| n)) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };
    if let Ok(meta) = fs::metadata(src) {
        let _ = filetime::set_file_mtime(&tmp, FileTime::from_last_modification_time(&meta));
    }
    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    let _ = fsync_dir(dest_dir);
    Ok(copied)
}

fn remove_any(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if !meta.is_dir() {
        return fs::remove_file(path);
    }
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        let _ = clear_readonly(entry.path());
    }
    fs::remove_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_source_fails_immediately() {
        let td = tempfile::tempdir().unwrap();
        let fs_op = ResilientFs::new(Duration::from_secs(5));
        let start = Instant::now();
        let err = fs_op
            .rename(&td.path().join("nope"), &td.path().join("dest"))
            .unwrap_err();
        assert!(matches!(err, WatchError::SourceMissing(_)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn persistent_failure_times_out() {
        let td = tempfile::tempdir().unwrap();
        let src = td.path().join("a.tif");
        fs::write(&src, b"frame").unwrap();
        // Destination parent does not exist, so every attempt fails.
        let dest = td.path().join("missing").join("a.tif");
        let fs_op = ResilientFs::new(Duration::from_millis(300)).with_backoff(Duration::from_millis(50));
        let start = Instant::now();
        let err = fs_op.rename(&src, &dest).unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, WatchError::IoTimeout { op: "move", .. }), "{err:?}");
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(2));
        assert!(src.exists());
    }

    #[test]
    fn copies_tree_and_preserves_mtime() {
        let td = tempfile::tempdir().unwrap();
        let src = td.path().join("temp_x");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.tif"), b"12345678").unwrap();
        fs::write(src.join("sub").join("b"), b"xy").unwrap();
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(src.join("a.tif"), old).unwrap();

        let dest = td.path().join("out");
        let n = ResilientFs::default().copy(&src, &dest).unwrap();
        assert_eq!(n, 10);
        assert_eq!(fs::read(dest.join("sub").join("b")).unwrap(), b"xy");
        let meta = fs::metadata(dest.join("a.tif")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
    }

    #[cfg(unix)]
    #[test]
    fn removes_read_only_tree() {
        use std::os::unix::fs::PermissionsExt;
        let td = tempfile::tempdir().unwrap();
        let dir = td.path().join("temp_y");
        fs::create_dir(&dir).unwrap();
        let f = dir.join("frame.tif");
        fs::write(&f, b"x").unwrap();
        fs::set_permissions(&f, fs::Permissions::from_mode(0o444)).unwrap();
        ResilientFs::default().remove(&dir).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn rename_moves_file() {
        let td = tempfile::tempdir().unwrap();
        let src = td.path().join("a");
        let dest = td.path().join("b");
        fs::write(&src, b"1").unwrap();
        ResilientFs::default().rename(&src, &dest).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"1");
    }
}
