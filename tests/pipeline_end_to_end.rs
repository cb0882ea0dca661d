use std::fs;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};

use filetime::{FileTime, set_file_mtime};
use pe_watch::{Config, Daemon, LockDir, SharedConfig, StageContext, StopSignal, default_stages};
use pe_watch::plugin::register_all;

fn config_in(root: &Path) -> Config {
    let mut cfg = Config::with_data_root(root);
    for d in [&cfg.raw_dir, &cfg.temp_dir, &cfg.proc_dir, &cfg.output_root] {
        fs::create_dir_all(d).unwrap();
    }
    cfg.output_dir = "run01".into();
    cfg
}

fn drop_pair(raw: &Path, stem: &str) {
    let art = raw.join(format!("{stem}.tif"));
    let meta = raw.join(format!("{stem}.tif.metadata"));
    fs::write(&art, b"frame-bytes-0123").unwrap();
    fs::write(&meta, "exposureTime=0.5\nsummedExposures=2\n").unwrap();
    let old = FileTime::from_unix_time(1_600_000_000, 0);
    set_file_mtime(&art, old).unwrap();
    set_file_mtime(&meta, old).unwrap();
}

#[test]
fn stages_in_order_publish_every_pair() {
    let td = tempfile::tempdir().unwrap();
    let cfg = config_in(td.path());
    drop_pair(&cfg.raw_dir, "f001");
    drop_pair(&cfg.raw_dir, "f002");
    let locks = LockDir::resolve(&cfg.lock_dir, &cfg.scratch_dir).unwrap();
    let ctx = StageContext::new(cfg.clone(), StopSignal::new());

    let plugins = register_all(default_stages(), 3);
    let names: Vec<_> = plugins.iter().map(|p| p.name().to_string()).collect();
    assert_eq!(names, ["intake", "merge", "finalize"]);
    for p in &plugins {
        let report = p.execute(&ctx, &locks, false).unwrap().unwrap();
        assert_eq!(report.promoted, 2, "stage {}", p.name());
    }

    let out = cfg.output_root.join("run01");
    for name in [
        "f001.tif",
        "f001.tif.metadata",
        "f001.nxs.json",
        "f002.tif",
        "f002.tif.metadata",
        "f002.nxs.json",
    ] {
        assert!(out.join(name).is_file(), "missing {name}");
    }
    for d in [&cfg.raw_dir, &cfg.temp_dir, &cfg.proc_dir] {
        assert_eq!(fs::read_dir(d).unwrap().count(), 0, "{} not empty", d.display());
    }
}

#[test]
fn daemon_moves_data_without_intervention() {
    let td = tempfile::tempdir().unwrap();
    let mut cfg = config_in(td.path());
    cfg.base_interval = Duration::from_millis(60);
    drop_pair(&cfg.raw_dir, "frame");
    let out = cfg.output_target();

    let daemon = Daemon::with_default_stages(SharedConfig::new(cfg)).unwrap();
    daemon.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while !out.join("frame.nxs.json").is_file() && Instant::now() < deadline {
        sleep(Duration::from_millis(20));
    }
    let summary = daemon.stop(Duration::from_secs(5)).expect("scheduler stops");

    assert!(out.join("frame.tif").is_file());
    assert!(out.join("frame.nxs.json").is_file());
    assert!(summary.launched >= 3);
}
