use std::fs;
use std::path::Path;

use filetime::{FileTime, set_file_mtime};
use pe_watch::fs_ops::container::CONTAINER_PREFIX;
use pe_watch::{Config, Intake, LockDir, PluginDescriptor, StageContext, StopSignal};
use std::sync::Arc;

fn setup(root: &Path) -> (StageContext, LockDir) {
    let cfg = Config::with_data_root(root);
    for d in [&cfg.raw_dir, &cfg.temp_dir, &cfg.proc_dir, &cfg.output_root] {
        fs::create_dir_all(d).unwrap();
    }
    let locks = LockDir::resolve(&cfg.lock_dir, &cfg.scratch_dir).unwrap();
    (StageContext::new(cfg, StopSignal::new()), locks)
}

fn write_aged(path: &Path, body: &[u8]) {
    fs::write(path, body).unwrap();
    set_file_mtime(path, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
}

fn intake() -> PluginDescriptor {
    PluginDescriptor::register(Arc::new(Intake), 3).unwrap()
}

#[test]
fn stable_pair_lands_in_a_revealed_container() {
    let td = tempfile::tempdir().unwrap();
    let (ctx, locks) = setup(td.path());
    let raw = ctx.dirs.raw.clone();
    write_aged(&raw.join("a.tif"), b"0123456789");
    write_aged(&raw.join("a.tif.metadata"), b"exposureTime=0.5\n");

    let report = intake().execute(&ctx, &locks, false).unwrap().expect("not contended");
    assert_eq!(report.promoted, 1);
    assert_eq!(report.failed, 0);

    assert!(!raw.join("a.tif").exists());
    assert!(!raw.join("a.tif.metadata").exists());

    let containers: Vec<_> = fs::read_dir(&ctx.dirs.temp)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(containers.len(), 1);
    let name = containers[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with(CONTAINER_PREFIX), "unexpected container {name}");
    assert!(!name.ends_with(".lock") && !name.ends_with(".dump"));
    assert!(containers[0].join("a.tif").is_file());
    assert!(containers[0].join("a.tif.metadata").is_file());

    // The execution lock is gone after the run.
    assert!(!locks.is_locked("intake"));
}

#[test]
fn dark_frames_are_deleted() {
    let td = tempfile::tempdir().unwrap();
    let (ctx, locks) = setup(td.path());
    let raw = ctx.dirs.raw.clone();
    write_aged(&raw.join("x_dark.tif"), b"0123456789");

    let report = intake().execute(&ctx, &locks, false).unwrap().unwrap();
    assert_eq!(report.discarded, 1);
    assert_eq!(report.promoted, 0);
    assert!(!raw.join("x_dark.tif").exists());
    assert_eq!(fs::read_dir(&ctx.dirs.temp).unwrap().count(), 0);
}

#[test]
fn fresh_or_unpaired_files_wait() {
    let td = tempfile::tempdir().unwrap();
    let (ctx, locks) = setup(td.path());
    let raw = ctx.dirs.raw.clone();
    // No sidecar yet.
    write_aged(&raw.join("b.tif"), b"0123456789");
    // Pair present but the artifact was just written.
    fs::write(raw.join("c.tif"), b"0123456789").unwrap();
    write_aged(&raw.join("c.tif.metadata"), b"exposureTime=1\n");

    let report = intake().execute(&ctx, &locks, false).unwrap().unwrap();
    assert_eq!(report.promoted, 0);
    assert_eq!(report.skipped, 2);
    assert!(raw.join("b.tif").exists());
    assert!(raw.join("c.tif").exists());
    assert_eq!(fs::read_dir(&ctx.dirs.temp).unwrap().count(), 0);
}

#[test]
fn missing_raw_dir_is_a_no_op() {
    let td = tempfile::tempdir().unwrap();
    let (ctx, locks) = setup(td.path());
    fs::remove_dir(&ctx.dirs.raw).unwrap();
    let report = intake().execute(&ctx, &locks, false).unwrap().unwrap();
    assert_eq!(report, Default::default());
}
