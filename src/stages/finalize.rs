//! Finalize: publish merged containers into the output directory and delete the source.

use anyhow::Result;
use std::path::Path;
use tracing::debug;

use crate::fs_ops::space::{ensure_space_for, tree_size};
use crate::fs_ops::{Container, ResilientFs, scan_revealed};
use crate::plugin::{RunState, Stage, StageContext};

use super::{Outcome, require_dirs, tally};

#[derive(Debug, Default, Clone, Copy)]
pub struct Finalize;

impl Finalize {
    pub const NAME: &'static str = "finalize";
}

fn publish(
    mut container: Container,
    fs_op: &ResilientFs,
    proc_dir: &Path,
    output: &Path,
) -> Result<Outcome> {
    container.claim(fs_op)?;

    let copy_all = |c: &Container| -> Result<()> {
        ensure_space_for(output, tree_size(&c.path()))?;
        for file in c.files()? {
            let dest = output.join(file.file_name().unwrap_or_default());
            fs_op.copy(&file, &dest)?;
        }
        Ok(())
    };
    if let Err(e) = copy_all(&container) {
        // Leave it for the next run.
        let _ = container.restore(fs_op, proc_dir);
        return Err(e);
    }

    // Copies are in place; republishing on the next run only overwrites them.
    if let Err(e) = fs_op.remove(&container.path()) {
        let _ = container.restore(fs_op, proc_dir);
        return Err(e.into());
    }
    debug!(container = %container.name(), output = %output.display(), "container published");
    Ok(Outcome::Promoted)
}

impl Stage for Finalize {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn tick_period(&self) -> Option<u64> {
        Some(3)
    }

    fn tick_offset(&self) -> Option<u64> {
        Some(2)
    }

    fn work(&self, ctx: &StageContext, run: &mut RunState) -> Result<()> {
        let proc = ctx.dirs.proc.as_path();
        let output = ctx.dirs.output.as_path();
        if !require_dirs(self.name(), &[("proc_dir", proc), ("output_dir", output)]) {
            return Ok(());
        }

        let containers = scan_revealed(proc)?;
        if containers.is_empty() {
            return Ok(());
        }
        run.queued.extend(containers.iter().map(|c| c.path()));

        let results = ctx.pool.map("finalize", containers, |c: Container| {
            if let Some(e) = ctx.interrupted() {
                return Err(e.into());
            }
            publish(c, &ctx.fs, proc, output)
        });
        tally(self.name(), &mut run.report, results);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn publishes_files_and_removes_container() {
        let td = tempfile::tempdir().unwrap();
        let proc = td.path().join("proc");
        let out = td.path().join("out");
        fs::create_dir_all(&proc).unwrap();
        fs::create_dir_all(&out).unwrap();
        let fs_op = ResilientFs::default();

        let mut c = Container::create_in(&proc).unwrap();
        fs::write(c.path().join("a.tif"), b"frame").unwrap();
        fs::write(c.path().join("a.nxs.json"), b"{}").unwrap();
        c.reveal(&fs_op).unwrap();

        let found = scan_revealed(&proc).unwrap().remove(0);
        assert_eq!(publish(found, &fs_op, &proc, &out).unwrap(), Outcome::Promoted);
        assert_eq!(fs::read(out.join("a.tif")).unwrap(), b"frame");
        assert!(out.join("a.nxs.json").is_file());
        assert_eq!(fs::read_dir(&proc).unwrap().count(), 0);
    }

    #[test]
    fn failed_publication_unclaims() {
        let td = tempfile::tempdir().unwrap();
        let proc = td.path().join("proc");
        fs::create_dir_all(&proc).unwrap();
        let fs_op = ResilientFs::default();
        let mut c = Container::create_in(&proc).unwrap();
        fs::write(c.path().join("a.tif"), b"frame").unwrap();
        c.reveal(&fs_op).unwrap();

        // Output directory does not exist: the space query fails.
        let found = scan_revealed(&proc).unwrap().remove(0);
        assert!(publish(found, &fs_op, &proc, &td.path().join("missing")).is_err());
        assert_eq!(scan_revealed(&proc).unwrap().len(), 1);
        let names: Vec<_> = fs::read_dir(&proc)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".lock")), "{names:?}");
    }
}
