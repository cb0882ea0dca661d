//! The three promotion stages: raw -> temp (intake), temp -> proc (merge), proc -> output (finalize).
//!
//! Each stage run scans its input directory, queues work for the bounded pool and
//! tallies the per-item outcomes into the run report.

mod finalize;
mod intake;
mod merge;

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::errors::{ConfigError, WatchError};
use crate::plugin::{Stage, StageReport};

pub use finalize::Finalize;
pub use intake::{FileUnit, Intake, SIDECAR_EXT};
pub use merge::Merge;

/// Per-item result used for the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Promoted,
    Discarded,
    /// Another run took the item first, or nothing needed doing.
    Skipped,
}

/// Intake, merge and finalize with their default tick metadata.
pub fn default_stages() -> Vec<Arc<dyn Stage>> {
    vec![Arc::new(Intake), Arc::new(Merge), Arc::new(Finalize)]
}

/// Look a stage up by name, for standalone runs.
pub fn stage_by_name(name: &str) -> Option<Arc<dyn Stage>> {
    default_stages().into_iter().find(|s| s.name() == name)
}

/// True when every directory exists; otherwise logs each missing one.
pub(crate) fn require_dirs(stage: &str, dirs: &[(&'static str, &Path)]) -> bool {
    let mut ok = true;
    for &(name, path) in dirs {
        if !path.is_dir() {
            let e = ConfigError::DirectoryMissing {
                name,
                path: path.to_path_buf(),
            };
            error!(stage, code = e.code(), error = %e, "Stage directory missing; skipping run");
            ok = false;
        }
    }
    ok
}

pub(crate) fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("compile {name} '{pattern}'"))
}

pub(crate) fn tally(stage: &str, report: &mut StageReport, results: Vec<Result<Outcome>>) {
    for r in results {
        match r {
            Ok(Outcome::Promoted) => report.promoted += 1,
            Ok(Outcome::Discarded) => report.discarded += 1,
            Ok(Outcome::Skipped) => report.skipped += 1,
            Err(e) => match e.downcast_ref::<WatchError>() {
                Some(WatchError::Interrupted) => {
                    debug!(stage, "item not started; stop requested");
                    report.skipped += 1;
                }
                Some(WatchError::SourceMissing(p)) => {
                    debug!(stage, path = %p.display(), "item taken by another run");
                    report.skipped += 1;
                }
                _ => {
                    warn!(stage, error = %format!("{e:#}"), "item failed");
                    report.failed += 1;
                }
            },
        }
    }
}
