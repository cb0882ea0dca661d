//! Intake: validate raw detector output and move each artifact/sidecar pair into its own
//! container under temp_dir. Discard-pattern files (dark frames) are deleted.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};

use crate::fs_ops::{Container, ResilientFs, io_error_with_help, is_hidden_or_locked};
use crate::plugin::{RunState, Stage, StageContext};

use super::{Outcome, compile, require_dirs, tally};

pub const SIDECAR_EXT: &str = "metadata";

/// An artifact and its `<artifact>.metadata` sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUnit {
    pub artifact: PathBuf,
    pub sidecar: PathBuf,
}

impl FileUnit {
    pub fn for_artifact(artifact: &Path) -> Self {
        let mut sidecar = artifact.as_os_str().to_os_string();
        sidecar.push(format!(".{SIDECAR_EXT}"));
        Self {
            artifact: artifact.to_path_buf(),
            sidecar: PathBuf::from(sidecar),
        }
    }

    /// Both files exist, are at least `min_size` bytes, and were last modified more than
    /// `quiet` before `now`.
    pub fn is_eligible(&self, min_size: u64, quiet: Duration, now: SystemTime) -> bool {
        [&self.artifact, &self.sidecar].iter().all(|p| {
            let Ok(meta) = fs::metadata(p) else {
                return false;
            };
            let settled = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .is_some_and(|age| age > quiet);
            meta.is_file() && meta.len() >= min_size && settled
        })
    }

    /// Move the pair into a fresh container below `temp_dir`, then reveal it.
    /// When the sidecar cannot follow, the artifact is moved back; if that also fails the
    /// container is marked discard pending so it is never revealed half-filled.
    fn promote(&self, fs_op: &ResilientFs, raw_dir: &Path, temp_dir: &Path) -> Result<()> {
        let mut container = Container::create_in(temp_dir).context("create intake container")?;
        let moved_artifact = container
            .path()
            .join(self.artifact.file_name().unwrap_or_default());
        let moved_sidecar = container
            .path()
            .join(self.sidecar.file_name().unwrap_or_default());

        if let Err(e) = fs_op.rename(&self.artifact, &moved_artifact) {
            let _ = fs::remove_dir(container.path());
            return Err(e.into());
        }

        if let Err(e) = fs_op.rename(&self.sidecar, &moved_sidecar) {
            let back = raw_dir.join(self.artifact.file_name().unwrap_or_default());
            match fs_op.rename(&moved_artifact, &back) {
                Ok(()) => {
                    let _ = fs::remove_dir(container.path());
                }
                Err(rollback) => {
                    error!(container = %container.name(), error = %rollback, "Rollback failed; discarding container");
                    let _ = container.discard(fs_op);
                }
            }
            return Err(e.into());
        }

        if let Err(e) = container.reveal(fs_op) {
            let _ = container.discard(fs_op);
            return Err(e.into());
        }
        debug!(artifact = %self.artifact.display(), container = %container.name(), "pair promoted");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Intake;

impl Intake {
    pub const NAME: &'static str = "intake";
}

impl Stage for Intake {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn tick_period(&self) -> Option<u64> {
        Some(3)
    }

    fn tick_offset(&self) -> Option<u64> {
        Some(0)
    }

    fn work(&self, ctx: &StageContext, run: &mut RunState) -> Result<()> {
        let raw = &ctx.dirs.raw;
        let temp = &ctx.dirs.temp;
        if !require_dirs(self.name(), &[("raw_dir", raw.as_path()), ("temp_dir", temp.as_path())]) {
            return Ok(());
        }
        let cfg = &ctx.config;
        let discard = compile("discard_pattern", &cfg.discard_pattern)?;
        let artifact = compile("artifact_pattern", &cfg.artifact_pattern)?;

        let mut doomed = Vec::new();
        let mut candidates = Vec::new();
        for entry in fs::read_dir(raw).map_err(io_error_with_help("scan raw directory", raw))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_hidden_or_locked(&name) {
                continue;
            }
            if discard.is_match(&name) {
                doomed.push(entry.path());
            } else if artifact.is_match(&name) && entry.file_type()?.is_file() {
                candidates.push(entry.path());
            }
        }

        if !doomed.is_empty() {
            info!(stage = self.name(), count = doomed.len(), "Deleting discard-pattern files");
            let results = ctx.pool.map("intake-delete", doomed, |p: PathBuf| {
                if let Some(e) = ctx.interrupted() {
                    return Err(e.into());
                }
                ctx.fs.remove(&p)?;
                Ok(Outcome::Discarded)
            });
            tally(self.name(), &mut run.report, results);
        }

        let now = SystemTime::now();
        for path in candidates {
            let unit = FileUnit::for_artifact(&path);
            if unit.is_eligible(cfg.size_threshold, cfg.quiet_period, now) {
                run.queued.push(path);
            } else {
                debug!(artifact = %path.display(), "not yet eligible");
                run.report.skipped += 1;
            }
        }
        if run.queued.is_empty() {
            return Ok(());
        }

        let queued = std::mem::take(&mut run.queued);
        let results = ctx.pool.map("intake", queued, |p: PathBuf| {
            if let Some(e) = ctx.interrupted() {
                return Err(e.into());
            }
            FileUnit::for_artifact(&p).promote(&ctx.fs, raw, temp)?;
            Ok(Outcome::Promoted)
        });
        tally(self.name(), &mut run.report, results);
        Ok(())
    }
}
