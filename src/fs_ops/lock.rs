//! Execution locks.
//! One marker file per worker identity ensures a stage never runs twice at the same time,
//! whether the second run comes from the scheduler or from a separate `pe_watch stage` process.
//!
//! Design:
//! - The marker `<identity>.lock` is created with O_EXCL inside the lock directory;
//!   creation failing with AlreadyExists means another run holds it.
//! - The marker holds `<pid>_<nanos>_<seq>`, unique per acquisition. The pid prefix is
//!   for operators.
//! - The guard removes the marker on drop, so every exit path (including a panic
//!   unwinding through the stage) releases it. A marker whose token no longer matches
//!   (forced unlock followed by another acquisition) belongs to someone else and stays.
//! - Markers left behind by a crash are swept unconditionally at daemon startup,
//!   or cleared per identity with a forced unlock.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn};

use crate::errors::WatchError;

use super::helpers::io_error_with_help_io;
use super::util::unique_token;

const MARKER_EXT: &str = "lock";

/// Directory holding the markers; falls back to a scratch location when the
/// configured one cannot be created.
#[derive(Debug, Clone)]
pub struct LockDir {
    dir: PathBuf,
}

impl LockDir {
    pub fn resolve(primary: &Path, scratch: &Path) -> io::Result<LockDir> {
        match fs::create_dir_all(primary) {
            Ok(()) => Ok(LockDir {
                dir: primary.to_path_buf(),
            }),
            Err(e) => {
                warn!(primary = %primary.display(), scratch = %scratch.display(), error = %e, "Lock directory unavailable; using scratch");
                fs::create_dir_all(scratch)
                    .map_err(io_error_with_help_io("create scratch lock directory", scratch))?;
                Ok(LockDir {
                    dir: scratch.to_path_buf(),
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn marker(&self, identity: &str) -> PathBuf {
        let clean: String = identity
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{clean}.{MARKER_EXT}"))
    }

    /// Non-blocking acquire. Contention is reported as `WatchError::LockContention`.
    pub fn try_acquire(&self, identity: &str) -> anyhow::Result<ExecutionGuard> {
        let marker = self.marker(identity);
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(mut f) => {
                let token = unique_token();
                if let Err(e) = writeln!(f, "{token}").and_then(|()| f.sync_all()) {
                    let _ = fs::remove_file(&marker);
                    return Err(io_error_with_help_io("write lock marker", &marker)(e).into());
                }
                trace!(identity, marker = %marker.display(), "lock acquired");
                Ok(ExecutionGuard {
                    identity: identity.to_string(),
                    marker,
                    token,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                trace!(identity, "lock held elsewhere");
                Err(WatchError::LockContention(identity.to_string()).into())
            }
            Err(e) => Err(io_error_with_help_io("create lock marker", &marker)(e).into()),
        }
    }

    pub fn is_locked(&self, identity: &str) -> bool {
        self.marker(identity).exists()
    }

    /// Remove a (possibly stale) marker regardless of who holds it.
    pub fn force_unlock(&self, identity: &str) -> io::Result<bool> {
        let marker = self.marker(identity);
        match fs::remove_file(&marker) {
            Ok(()) => {
                info!(identity, "forced unlock");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error_with_help_io("remove lock marker", &marker)(e)),
        }
    }

    /// Remove every marker in the directory. Returns how many were removed.
    pub fn sweep(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(io_error_with_help_io("list lock directory", &self.dir))? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == MARKER_EXT) {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => error!(marker = %path.display(), error = %e, "Could not remove stale lock"),
                }
            }
        }
        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "Swept stale execution locks");
        }
        Ok(removed)
    }
}

/// RAII guard held while a stage runs; removes its marker on drop.
#[derive(Debug)]
pub struct ExecutionGuard {
    identity: String,
    marker: PathBuf,
    token: String,
}

impl ExecutionGuard {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn still_owned(&self) -> bool {
        fs::read_to_string(&self.marker).is_ok_and(|held| held.trim() == self.token)
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if !self.still_owned() {
            warn!(identity = %self.identity, "Lock marker was replaced; leaving it to its holder");
            return;
        }
        match fs::remove_file(&self.marker) {
            Ok(()) => debug!(identity = %self.identity, "lock released"),
            // Cleared by a forced unlock while we were running.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!(identity = %self.identity, error = %e, "Could not release lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_dir(td: &tempfile::TempDir) -> LockDir {
        LockDir::resolve(&td.path().join("locks"), &td.path().join("scratch")).unwrap()
    }

    #[test]
    fn one_holder_per_identity() {
        let td = tempfile::tempdir().unwrap();
        let locks = lock_dir(&td);
        let g = locks.try_acquire("intake").unwrap();
        let err = locks.try_acquire("intake").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WatchError>(),
            Some(WatchError::LockContention(id)) if id == "intake"
        ));
        // Different identities do not contend.
        let _m = locks.try_acquire("merge").unwrap();
        drop(g);
        assert!(!locks.is_locked("intake"));
        let _again = locks.try_acquire("intake").unwrap();
    }

    #[test]
    fn sweep_and_force_unlock() {
        let td = tempfile::tempdir().unwrap();
        let locks = lock_dir(&td);
        std::mem::forget(locks.try_acquire("intake").unwrap());
        std::mem::forget(locks.try_acquire("merge").unwrap());
        assert!(locks.force_unlock("intake").unwrap());
        assert!(!locks.force_unlock("intake").unwrap());
        assert_eq!(locks.sweep().unwrap(), 1);
        assert!(!locks.is_locked("merge"));
    }

    #[test]
    fn falls_back_to_scratch() {
        let td = tempfile::tempdir().unwrap();
        let blocker = td.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let locks = LockDir::resolve(&blocker.join("locks"), &td.path().join("scratch")).unwrap();
        assert_eq!(locks.path(), td.path().join("scratch"));
    }

    #[test]
    fn guard_released_on_panic() {
        let td = tempfile::tempdir().unwrap();
        let locks = lock_dir(&td);
        let l2 = locks.clone();
        let r = std::panic::catch_unwind(move || {
            let _g = l2.try_acquire("finalize").unwrap();
            panic!("stage failed");
        });
        assert!(r.is_err());
        assert!(!locks.is_locked("finalize"));
    }

    #[test]
    fn stale_guard_keeps_the_new_holders_marker() {
        let td = tempfile::tempdir().unwrap();
        let locks = lock_dir(&td);
        let first = locks.try_acquire("intake").unwrap();
        assert!(locks.force_unlock("intake").unwrap());
        let second = locks.try_acquire("intake").unwrap();

        drop(first);
        assert!(locks.is_locked("intake"));
        assert!(locks.try_acquire("intake").is_err());

        drop(second);
        assert!(!locks.is_locked("intake"));
    }
}
