//! Stage containers: directories that carry one or more files between stage directories.
//!
//! The on-disk name encodes the state:
//! - `temp_<token>.lock`  in flight, owned by the process that renamed it
//! - `temp_<token>`       revealed, ready for the next stage
//! - `temp_<token>.dump`  discard pending, never picked up again
//!
//! Only the owner renames a container out of the in-flight state. Scanners skip
//! both suffixes, so a half-filled container is never visible to another stage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, trace};

use crate::errors::WatchError;

use super::helpers::io_error_with_help_io;
use super::resilient::ResilientFs;
use super::util::unique_token;

pub const CONTAINER_PREFIX: &str = "temp_";
pub const IN_FLIGHT_SUFFIX: &str = ".lock";
pub const DISCARD_SUFFIX: &str = ".dump";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    InFlight,
    Revealed,
    Discarded,
}

impl ContainerState {
    pub fn suffix(self) -> &'static str {
        match self {
            ContainerState::InFlight => IN_FLIGHT_SUFFIX,
            ContainerState::Revealed => "",
            ContainerState::Discarded => DISCARD_SUFFIX,
        }
    }

    /// State encoded in a file name.
    pub fn of_name(name: &str) -> Self {
        if name.ends_with(IN_FLIGHT_SUFFIX) {
            ContainerState::InFlight
        } else if name.ends_with(DISCARD_SUFFIX) {
            ContainerState::Discarded
        } else {
            ContainerState::Revealed
        }
    }
}

/// A container directory and the state its name currently encodes.
#[derive(Debug, Clone)]
pub struct Container {
    // Path without any suffix.
    base: PathBuf,
    state: ContainerState,
}

impl Container {
    /// Create a fresh in-flight container below `dir`.
    pub fn create_in(dir: &Path) -> io::Result<Container> {
        const MAX_TRIES: u32 = 5;
        let mut last = None;
        for _ in 0..MAX_TRIES {
            let base = dir.join(format!("{CONTAINER_PREFIX}{}", unique_token()));
            let c = Container {
                base,
                state: ContainerState::InFlight,
            };
            if c.base.exists() {
                continue;
            }
            match fs::create_dir(c.path()) {
                Ok(()) => {
                    trace!(container = %c.path().display(), "container created");
                    return Ok(c);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last = Some(e),
                Err(e) => return Err(io_error_with_help_io("create container", dir)(e)),
            }
        }
        Err(last.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AlreadyExists, "no unique container name")
        }))
    }

    /// Wrap a path seen on disk; the state is read from its suffix.
    pub fn from_path(path: &Path) -> Container {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let state = ContainerState::of_name(&name);
        let stem = &name[..name.len() - state.suffix().len()];
        Container {
            base: path.with_file_name(stem),
            state,
        }
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Current on-disk path.
    pub fn path(&self) -> PathBuf {
        path_in_state(&self.base, self.state)
    }

    /// Base name without suffix, e.g. `temp_123_456_0`.
    pub fn name(&self) -> String {
        self.base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn transition(&mut self, fs_op: &ResilientFs, to: ContainerState) -> Result<(), WatchError> {
        if self.state == to {
            return Ok(());
        }
        let from = self.path();
        let dest = path_in_state(&self.base, to);
        fs_op.rename(&from, &dest)?;
        debug!(container = %self.name(), from = ?self.state, to = ?to, "container state change");
        self.state = to;
        Ok(())
    }

    /// Take ownership of a revealed container by renaming it in flight.
    /// A competitor that got there first makes this fail with `SourceMissing`.
    pub fn claim(&mut self, fs_op: &ResilientFs) -> Result<(), WatchError> {
        self.transition(fs_op, ContainerState::InFlight)
    }

    pub fn reveal(&mut self, fs_op: &ResilientFs) -> Result<(), WatchError> {
        self.transition(fs_op, ContainerState::Revealed)
    }

    pub fn discard(&mut self, fs_op: &ResilientFs) -> Result<(), WatchError> {
        self.transition(fs_op, ContainerState::Discarded)
    }

    /// Move the container into `dest_dir`, keeping its name and state.
    pub fn relocate(&mut self, fs_op: &ResilientFs, dest_dir: &Path) -> Result<(), WatchError> {
        let base = dest_dir.join(self.name());
        let dest = path_in_state(&base, self.state);
        fs_op.rename(&self.path(), &dest)?;
        debug!(container = %self.name(), dest = %dest_dir.display(), "container relocated");
        self.base = base;
        Ok(())
    }

    /// Undo a claim after a failed step: bring the container back into `dir` and reveal
    /// it there so the next run retries. When that fails too it is marked discard
    /// pending, never left in flight.
    pub fn restore(&mut self, fs_op: &ResilientFs, dir: &Path) -> Result<(), WatchError> {
        let at_home = self.base.parent() == Some(dir);
        let moved = if at_home { Ok(()) } else { self.relocate(fs_op, dir) };
        let result = moved.and_then(|()| self.reveal(fs_op));
        if let Err(e) = &result {
            error!(container = %self.name(), error = %e, "Could not restore container; marking it discard pending");
            let _ = self.discard(fs_op);
        }
        result
    }

    /// Regular files directly inside the container, sorted by name.
    pub fn files(&self) -> io::Result<Vec<PathBuf>> {
        let dir = self.path();
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_error_with_help_io("list container", &dir))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                out.push(entry.path());
            }
        }
        out.sort();
        Ok(out)
    }
}

fn path_in_state(base: &Path, state: ContainerState) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(state.suffix());
    PathBuf::from(name)
}

/// Revealed containers directly below `dir`, sorted by name.
pub fn scan_revealed(dir: &Path) -> io::Result<Vec<Container>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error_with_help_io("scan stage directory", dir))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(CONTAINER_PREFIX)
            || ContainerState::of_name(&name) != ContainerState::Revealed
        {
            continue;
        }
        if entry.file_type()?.is_dir() {
            out.push(Container::from_path(&entry.path()));
        }
    }
    out.sort_by_key(|c| c.name());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_from_name() {
        assert_eq!(ContainerState::of_name("temp_1.lock"), ContainerState::InFlight);
        assert_eq!(ContainerState::of_name("temp_1.dump"), ContainerState::Discarded);
        assert_eq!(ContainerState::of_name("temp_1"), ContainerState::Revealed);
    }

    #[test]
    fn lifecycle_renames_on_disk() {
        let td = tempfile::tempdir().unwrap();
        let fs_op = ResilientFs::default();
        let mut c = Container::create_in(td.path()).unwrap();
        assert_eq!(c.state(), ContainerState::InFlight);
        assert!(c.path().to_string_lossy().ends_with(".lock"));
        assert!(c.name().starts_with(CONTAINER_PREFIX));
        assert!(scan_revealed(td.path()).unwrap().is_empty());

        c.reveal(&fs_op).unwrap();
        assert!(td.path().join(c.name()).is_dir());
        let found = scan_revealed(td.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), c.name());

        c.discard(&fs_op).unwrap();
        assert!(td.path().join(format!("{}.dump", c.name())).is_dir());
        assert!(scan_revealed(td.path()).unwrap().is_empty());
    }

    #[test]
    fn relocate_keeps_state() {
        let td = tempfile::tempdir().unwrap();
        let other = td.path().join("proc");
        fs::create_dir(&other).unwrap();
        let fs_op = ResilientFs::default();
        let mut c = Container::create_in(td.path()).unwrap();
        fs::write(c.path().join("a.tif"), b"x").unwrap();
        c.relocate(&fs_op, &other).unwrap();
        assert_eq!(c.state(), ContainerState::InFlight);
        assert!(other.join(format!("{}.lock", c.name())).join("a.tif").is_file());
        assert_eq!(c.files().unwrap().len(), 1);
    }

    #[test]
    fn second_claim_loses() {
        let td = tempfile::tempdir().unwrap();
        let fs_op = ResilientFs::default();
        let mut c = Container::create_in(td.path()).unwrap();
        c.reveal(&fs_op).unwrap();
        let mut a = scan_revealed(td.path()).unwrap().remove(0);
        let mut b = a.clone();
        a.claim(&fs_op).unwrap();
        assert!(matches!(b.claim(&fs_op), Err(WatchError::SourceMissing(_))));
    }

    #[test]
    fn restore_reveals_back_in_the_prior_directory() {
        let td = tempfile::tempdir().unwrap();
        let temp = td.path().join("temp");
        let proc = td.path().join("proc");
        fs::create_dir(&temp).unwrap();
        fs::create_dir(&proc).unwrap();
        let fs_op = ResilientFs::default();
        let mut c = Container::create_in(&temp).unwrap();
        c.relocate(&fs_op, &proc).unwrap();

        c.restore(&fs_op, &temp).unwrap();
        assert_eq!(c.state(), ContainerState::Revealed);
        assert!(temp.join(c.name()).is_dir());
        assert_eq!(fs::read_dir(&proc).unwrap().count(), 0);

        // Already home: only the suffix changes.
        c.claim(&fs_op).unwrap();
        c.restore(&fs_op, &temp).unwrap();
        assert_eq!(scan_revealed(&temp).unwrap().len(), 1);
    }

    #[test]
    fn failed_restore_marks_discard_pending() {
        let td = tempfile::tempdir().unwrap();
        let fs_op = ResilientFs::new(std::time::Duration::from_millis(150))
            .with_backoff(std::time::Duration::from_millis(30));
        let mut c = Container::create_in(td.path()).unwrap();
        // A non-empty directory with the revealed name blocks the reveal rename.
        let blocker = td.path().join(c.name());
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("x"), b"x").unwrap();

        assert!(c.restore(&fs_op, td.path()).is_err());
        assert_eq!(c.state(), ContainerState::Discarded);
        assert!(td.path().join(format!("{}.dump", c.name())).is_dir());
    }
}
