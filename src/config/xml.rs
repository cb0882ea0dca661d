//! XML configuration support.
//! - Loads settings from config.xml (quick_xml).
//! - Creates a secure template if missing (unless PE_WATCH_CONFIG is set).
//!
//! Notes:
//! - This module only reads/writes the config file; directory validation happens in `validate`.
//! - Unknown XML fields are rejected to surface misconfigurations early.
//! - Bad scalar values are reported and replaced by the compiled-in default.

use anyhow::{Context, Result};
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

use super::paths::{default_config_path, path_has_symlink_ancestor};
use super::types::{Config, LogLevel, MaxConcurrency};
use super::CONFIG_ENV;

use crate::platform::{set_dir_mode_0700, set_file_mode_0600, write_config_secure_new_0600};

/// Struct mirroring the XML config for deserialization.
#[derive(Debug, Default, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    raw_dir: Option<String>,
    temp_dir: Option<String>,
    proc_dir: Option<String>,
    output_dir: Option<String>,
    output_root: Option<String>,
    max_concurrency: Option<String>,
    lock_dir: Option<String>,
    scratch_dir: Option<String>,
    log_level: Option<String>,
    log_file: Option<String>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    base_interval_ms: Option<u64>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    multiplier: Option<u64>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    fs_timeout_ms: Option<u64>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    quiet_period_ms: Option<u64>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    size_threshold: Option<u64>,
    discard_pattern: Option<String>,
    artifact_pattern: Option<String>,
}

/// Outcome of the startup config lookup.
#[derive(Debug)]
pub enum LoadResult {
    /// A config file was found and parsed.
    Loaded(Box<Config>, PathBuf),
    /// No config existed at the default location; a template was written there.
    CreatedTemplate(PathBuf),
    /// No file could be used; compiled-in defaults apply.
    Defaults,
}

// Trims surrounding whitespace for optional u64 values
fn de_u64_trimmed_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| s.trim().parse::<u64>().ok()))
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|t| !t.is_empty())
}

fn checked_pattern(name: &'static str, value: Option<&str>, fallback: &str) -> String {
    match non_empty(value) {
        Some(p) => match regex::Regex::new(p) {
            Ok(_) => p.to_string(),
            Err(e) => {
                error!(field = name, pattern = p, error = %e, "Invalid pattern in config; using default");
                fallback.to_string()
            }
        },
        None => fallback.to_string(),
    }
}

// Map XmlConfig -> Config, keeping defaults for absent values.
fn xml_to_config(parsed: XmlConfig) -> Config {
    let mut cfg = Config::default();

    let dirs: [(&Option<String>, &mut PathBuf); 7] = [
        (&parsed.raw_dir, &mut cfg.raw_dir),
        (&parsed.temp_dir, &mut cfg.temp_dir),
        (&parsed.proc_dir, &mut cfg.proc_dir),
        (&parsed.output_dir, &mut cfg.output_dir),
        (&parsed.output_root, &mut cfg.output_root),
        (&parsed.lock_dir, &mut cfg.lock_dir),
        (&parsed.scratch_dir, &mut cfg.scratch_dir),
    ];
    for (value, slot) in dirs {
        if let Some(v) = non_empty(value.as_deref()) {
            *slot = PathBuf::from(v);
        }
    }

    if let Some(s) = non_empty(parsed.max_concurrency.as_deref()) {
        cfg.max_concurrency = match MaxConcurrency::parse(s) {
            Ok(v) => v,
            Err(e) => {
                error!(code = e.code(), error = %e, "Bad max_concurrency in config; using default");
                MaxConcurrency::DEFAULT
            }
        };
    }

    if let Some(s) = non_empty(parsed.log_level.as_deref())
        && let Ok(level) = s.parse::<LogLevel>()
    {
        cfg.log_level = level;
    }
    if let Some(s) = non_empty(parsed.log_file.as_deref()) {
        cfg.log_file = Some(PathBuf::from(s));
    }

    if let Some(ms) = parsed.base_interval_ms.filter(|v| *v > 0) {
        cfg.base_interval = Duration::from_millis(ms);
    }
    if let Some(m) = parsed.multiplier.filter(|v| *v > 0) {
        cfg.multiplier = u32::try_from(m).unwrap_or(u32::MAX);
    }
    if let Some(ms) = parsed.fs_timeout_ms {
        cfg.fs_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = parsed.quiet_period_ms {
        cfg.quiet_period = Duration::from_millis(ms);
    }
    if let Some(bytes) = parsed.size_threshold {
        cfg.size_threshold = bytes;
    }

    cfg.discard_pattern = checked_pattern(
        "discard_pattern",
        parsed.discard_pattern.as_deref(),
        &cfg.discard_pattern,
    );
    cfg.artifact_pattern = checked_pattern(
        "artifact_pattern",
        parsed.artifact_pattern.as_deref(),
        &cfg.artifact_pattern,
    );

    cfg
}

/// Load a Config from a specific XML file path (quick_xml).
pub fn load_config_from_xml_path(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read config xml '{}'", path.display()))?;
    let parsed: XmlConfig = from_xml_str(&contents)
        .with_context(|| format!("parse config xml '{}'", path.display()))?;
    Ok(xml_to_config(parsed))
}

/// Resolve the config file and load it, writing a template on first run at the default location.
/// An explicit path (CLI `--config` or PE_WATCH_CONFIG) that does not exist is an error.
pub fn load_or_init(explicit: Option<&Path>) -> Result<LoadResult> {
    let env_set = env::var_os(CONFIG_ENV).is_some();
    let path = match explicit.map(Path::to_path_buf).or_else(default_config_path) {
        Some(p) => p,
        None => return Ok(LoadResult::Defaults),
    };

    if path.exists() {
        let cfg = load_config_from_xml_path(&path)?;
        return Ok(LoadResult::Loaded(Box::new(cfg), path));
    }

    if explicit.is_some() || env_set {
        anyhow::bail!("config file not found: {}", path.display());
    }

    create_template_config(&path)?;
    Ok(LoadResult::CreatedTemplate(path))
}

/// Create default template config file and parent directory (best-effort permissions).
pub fn create_template_config(path: &Path) -> Result<()> {
    if path_has_symlink_ancestor(path)? {
        return Err(anyhow::anyhow!(
            "Refusing to create config: ancestor of {} is a symlink",
            path.display()
        ));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        let _ = set_dir_mode_0700(parent);
    }

    let d = Config::default();
    let content = format!(
        "<!--\n  pe_watch configuration (XML)\n\n    raw_dir / temp_dir / proc_dir -> stage directories (must exist)\n    output_root            -> durable storage root (must exist)\n    output_dir             -> sub-path below output_root, created on demand (may be empty)\n    max_concurrency        -> workers per stage run, 1..9\n    lock_dir / scratch_dir -> execution-lock markers (scratch is the fallback)\n    log_level              -> quiet | normal | info | debug\n    base_interval_ms / multiplier -> scheduler period and resolution\n    fs_timeout_ms          -> retry budget of one filesystem operation\n    quiet_period_ms / size_threshold -> stability checks for raw files\n    discard_pattern / artifact_pattern -> regexes applied to raw file names\n\n  CLI flags override XML values.\n-->\n<config>\n  <raw_dir>{}</raw_dir>\n  <temp_dir>{}</temp_dir>\n  <proc_dir>{}</proc_dir>\n  <output_root>{}</output_root>\n  <output_dir></output_dir>\n  <max_concurrency>{}</max_concurrency>\n  <lock_dir>{}</lock_dir>\n  <scratch_dir>{}</scratch_dir>\n  <log_level>normal</log_level>\n  <base_interval_ms>{}</base_interval_ms>\n  <multiplier>{}</multiplier>\n  <fs_timeout_ms>{}</fs_timeout_ms>\n  <quiet_period_ms>{}</quiet_period_ms>\n  <size_threshold>{}</size_threshold>\n  <discard_pattern>{}</discard_pattern>\n  <artifact_pattern>{}</artifact_pattern>\n</config>\n",
        d.raw_dir.display(),
        d.temp_dir.display(),
        d.proc_dir.display(),
        d.output_root.display(),
        d.max_concurrency,
        d.lock_dir.display(),
        d.scratch_dir.display(),
        d.base_interval.as_millis(),
        d.multiplier,
        d.fs_timeout.as_millis(),
        d.quiet_period.as_millis(),
        d.size_threshold,
        d.discard_pattern,
        d.artifact_pattern,
    );

    write_config_secure_new_0600(path, content.as_bytes())?;
    let _ = set_file_mode_0600(path);

    info!("Created template config at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn template_round_trips_through_loader() {
        let td = tempdir().unwrap();
        let path = td.path().join("cfg").join("config.xml");
        create_template_config(&path).unwrap();
        let cfg = load_config_from_xml_path(&path).unwrap();
        let d = Config::default();
        assert_eq!(cfg.raw_dir, d.raw_dir);
        assert_eq!(cfg.max_concurrency, d.max_concurrency);
        assert_eq!(cfg.artifact_pattern, d.artifact_pattern);
        assert_eq!(cfg.multiplier, d.multiplier);
    }

    #[test]
    fn out_of_range_concurrency_falls_back_to_default() {
        let td = tempdir().unwrap();
        let path = td.path().join("config.xml");
        fs::write(&path, "<config><max_concurrency>15</max_concurrency></config>").unwrap();
        let cfg = load_config_from_xml_path(&path).unwrap();
        assert_eq!(cfg.max_concurrency, MaxConcurrency::DEFAULT);
    }

    #[test]
    fn invalid_pattern_falls_back_to_default() {
        let td = tempdir().unwrap();
        let path = td.path().join("config.xml");
        fs::write(&path, "<config><discard_pattern>([</discard_pattern></config>").unwrap();
        let cfg = load_config_from_xml_path(&path).unwrap();
        assert_eq!(cfg.discard_pattern, super::super::DEFAULT_DISCARD_PATTERN);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let td = tempdir().unwrap();
        let path = td.path().join("config.xml");
        fs::write(&path, "<config><bogus>1</bogus></config>").unwrap();
        assert!(load_config_from_xml_path(&path).is_err());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let td = tempdir().unwrap();
        let missing = td.path().join("nope.xml");
        assert!(load_or_init(Some(&missing)).is_err());
    }
}
