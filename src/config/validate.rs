//! Config validation logic.
//! Directory problems are never fatal: the offending value is reported, replaced by
//! the compiled-in default, and the default directory is created best-effort.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, error, info};

use crate::errors::ConfigError;

use super::types::Config;

fn is_dir(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// Characters stripped from the output sub-path by the control surface.
fn forbidden_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[!@#~*&^$\\./<>{}:;"'()]"#).expect("static regex"))
}

/// Strip characters that could escape output_root or confuse the facility share.
pub fn sanitize_output_subdir(value: &str) -> PathBuf {
    PathBuf::from(forbidden_chars().replace_all(value.trim(), "").into_owned())
}

/// Check that `path` is an existing directory.
pub(crate) fn check_dir(name: &'static str, path: &Path) -> Result<(), ConfigError> {
    if is_dir(path) {
        Ok(())
    } else {
        Err(ConfigError::DirectoryMissing {
            name,
            path: path.to_path_buf(),
        })
    }
}

/// Validate stage directories in place and canonicalize the ones that exist.
/// Returns every problem found; each one has already been logged and repaired.
pub fn validate_and_normalize(cfg: &mut Config) -> Vec<ConfigError> {
    let defaults = Config::default();
    let mut problems = Vec::new();

    let slots: [(&'static str, &mut PathBuf, &PathBuf); 4] = [
        ("raw_dir", &mut cfg.raw_dir, &defaults.raw_dir),
        ("temp_dir", &mut cfg.temp_dir, &defaults.temp_dir),
        ("proc_dir", &mut cfg.proc_dir, &defaults.proc_dir),
        ("output_root", &mut cfg.output_root, &defaults.output_root),
    ];

    for (name, slot, fallback) in slots {
        if let Err(e) = check_dir(name, slot) {
            error!(code = e.code(), error = %e, fallback = %fallback.display(), "Invalid directory; using default");
            if let Err(io) = fs::create_dir_all(fallback) {
                error!(name, path = %fallback.display(), error = %io, "Could not create default directory");
            } else {
                info!(name, path = %fallback.display(), "Default directory ready");
            }
            *slot = fallback.clone();
            problems.push(e);
        }
        if let Ok(real) = dunce::canonicalize(&*slot) {
            *slot = real;
        }
        debug!(name, path = %slot.display(), "directory validated");
    }

    let clean = sanitize_output_subdir(&cfg.output_dir.to_string_lossy());
    if clean != cfg.output_dir {
        let e = ConfigError::Invalid {
            name: "output_dir",
            value: cfg.output_dir.display().to_string(),
        };
        error!(code = e.code(), error = %e, sanitized = %clean.display(), "Output sub-path sanitized");
        cfg.output_dir = clean;
        problems.push(e);
    }

    problems
}
