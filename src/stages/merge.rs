//! Merge: embed sidecar header fields into each artifact, write its companion tree and
//! hand the container over to proc_dir.

use anyhow::Result;
use regex::Regex;
use std::path::Path;
use tracing::{debug, warn};

use crate::fs_ops::{Container, ResilientFs, scan_revealed};
use crate::header::{TiffMerge, merge_into_tiff, read_header, write_companion};
use crate::plugin::{RunState, Stage, StageContext};

use super::intake::FileUnit;
use super::{Outcome, compile, require_dirs, tally};

#[derive(Debug, Default, Clone, Copy)]
pub struct Merge;

impl Merge {
    pub const NAME: &'static str = "merge";
}

/// Header merge for one artifact. Problems are logged; the container still moves on.
fn merge_unit(unit: &FileUnit) {
    let header = match read_header(&unit.sidecar) {
        Ok(h) => h,
        Err(e) => {
            warn!(sidecar = %unit.sidecar.display(), error = %format!("{e:#}"), "Could not read sidecar");
            return;
        }
    };
    match merge_into_tiff(&unit.artifact, &header) {
        Ok(TiffMerge::Updated) => {}
        Ok(TiffMerge::NotTiff) => {
            warn!(artifact = %unit.artifact.display(), "Not a TIFF; header not embedded")
        }
        Err(e) => {
            warn!(artifact = %unit.artifact.display(), error = %format!("{e:#}"), "Header merge failed")
        }
    }
    if let Err(e) = write_companion(&unit.artifact, &unit.sidecar, &header) {
        warn!(artifact = %unit.artifact.display(), error = %format!("{e:#}"), "Companion not written");
    }
}

fn merge_container(
    mut container: Container,
    fs_op: &ResilientFs,
    artifact: &Regex,
    temp_dir: &Path,
    proc_dir: &Path,
) -> Result<Outcome> {
    container.claim(fs_op)?;

    let files = match container.files() {
        Ok(f) => f,
        Err(e) => {
            let _ = container.restore(fs_op, temp_dir);
            return Err(e.into());
        }
    };
    for path in &files {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if !artifact.is_match(&name) {
            continue;
        }
        let unit = FileUnit::for_artifact(path);
        if unit.sidecar.is_file() {
            merge_unit(&unit);
        } else {
            debug!(artifact = %path.display(), "no sidecar in container");
        }
    }

    // Any failure puts the container back in temp_dir for the next run.
    if let Err(e) = container
        .relocate(fs_op, proc_dir)
        .and_then(|()| container.reveal(fs_op))
    {
        let _ = container.restore(fs_op, temp_dir);
        return Err(e.into());
    }
    debug!(container = %container.name(), "container merged");
    Ok(Outcome::Promoted)
}

impl Stage for Merge {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn tick_period(&self) -> Option<u64> {
        Some(3)
    }

    fn tick_offset(&self) -> Option<u64> {
        Some(1)
    }

    fn work(&self, ctx: &StageContext, run: &mut RunState) -> Result<()> {
        let temp = ctx.dirs.temp.as_path();
        let proc = ctx.dirs.proc.as_path();
        if !require_dirs(self.name(), &[("temp_dir", temp), ("proc_dir", proc)]) {
            return Ok(());
        }
        let artifact = compile("artifact_pattern", &ctx.config.artifact_pattern)?;

        let containers = scan_revealed(temp)?;
        if containers.is_empty() {
            return Ok(());
        }
        run.queued.extend(containers.iter().map(|c| c.path()));

        let results = ctx.pool.map("merge", containers, |c: Container| {
            if let Some(e) = ctx.interrupted() {
                return Err(e.into());
            }
            merge_container(c, &ctx.fs, &artifact, temp, proc)
        });
        tally(self.name(), &mut run.report, results);
        Ok(())
    }
}
