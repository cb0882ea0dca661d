use std::fs;
use std::path::PathBuf;

use pe_watch::config::load_config_from_xml_path;
use pe_watch::{Config, ConfigError, MaxConcurrency, SharedConfig};

#[test]
fn out_of_range_concurrency_is_rejected_and_value_kept() {
    let td = tempfile::tempdir().unwrap();
    let mut cfg = Config::with_data_root(td.path());
    cfg.max_concurrency = MaxConcurrency::new(4).unwrap();
    let shared = SharedConfig::new(cfg);

    let err = shared.set_max_concurrency(15).unwrap_err();
    assert!(matches!(err, ConfigError::OutOfRange { .. }));
    assert_eq!(shared.max_concurrency().get(), 4);

    assert!(shared.set_max_concurrency_str("zero").is_err());
    assert_eq!(shared.max_concurrency().get(), 4);

    shared.set_max_concurrency(9).unwrap();
    assert_eq!(shared.max_concurrency().get(), 9);
}

#[test]
fn missing_directory_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let shared = SharedConfig::new(Config::with_data_root(td.path()));
    let before = shared.snapshot().raw_dir;

    let err = shared.set_raw_dir(td.path().join("nope")).unwrap_err();
    assert!(matches!(err, ConfigError::DirectoryMissing { .. }));
    assert_eq!(shared.snapshot().raw_dir, before);

    let fresh = td.path().join("fresh");
    fs::create_dir(&fresh).unwrap();
    shared.set_raw_dir(&fresh).unwrap();
    assert_eq!(shared.raw_dir(), fresh);
}

#[test]
fn output_sub_path_is_sanitized() {
    let td = tempfile::tempdir().unwrap();
    let shared = SharedConfig::new(Config::with_data_root(td.path()));
    let stored = shared.set_output_dir("beam*time:2026");
    assert_eq!(stored, PathBuf::from("beamtime2026"));
    assert_eq!(shared.output_dir(), stored);
}

#[test]
fn xml_values_are_loaded() {
    let td = assert_fs::TempDir::new().unwrap();
    let raw = td.path().join("raw");
    let path = td.path().join("config.xml");
    let xml = format!(
        r#"<config>
  <raw_dir>{}</raw_dir>
  <max_concurrency> 3 </max_concurrency>
  <base_interval_ms>500</base_interval_ms>
  <multiplier>5</multiplier>
  <quiet_period_ms>50</quiet_period_ms>
  <discard_pattern>_bkg</discard_pattern>
  <log_level>debug</log_level>
</config>"#,
        raw.display()
    );
    fs::write(&path, xml).unwrap();

    let cfg = load_config_from_xml_path(&path).unwrap();
    assert_eq!(cfg.raw_dir, raw);
    assert_eq!(cfg.max_concurrency.get(), 3);
    assert_eq!(cfg.tick_quantum().as_millis(), 100);
    assert_eq!(cfg.quiet_period.as_millis(), 50);
    assert_eq!(cfg.discard_pattern, "_bkg");
    assert_eq!(cfg.log_level, pe_watch::LogLevel::Debug);
}

#[test]
fn unknown_xml_field_is_an_error() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("config.xml");
    fs::write(&path, "<config><colour>blue</colour></config>").unwrap();
    assert!(load_config_from_xml_path(&path).is_err());
}
