//! Default path helpers and symlink checks.
//! Determines OS-appropriate config/data/log paths and detects symlinked ancestors for safety.

use dirs::{config_dir, data_dir};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::CONFIG_ENV;

const APP_DIR: &str = "pe_watch";

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut p = env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| env::temp_dir());
    for part in parts {
        p.push(part);
    }
    p
}

/// Config path: `$PE_WATCH_CONFIG` if set, else the OS config dir.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(explicit) = env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(explicit));
    }
    if let Some(mut base) = config_dir() {
        base.push(APP_DIR);
        base.push("config.xml");
        Some(base)
    } else {
        env::var("HOME").ok().map(|h| {
            PathBuf::from(h)
                .join(".config")
                .join(APP_DIR)
                .join("config.xml")
        })
    }
}

/// Root of the compiled-in stage directories (raw/temp/proc/output).
pub fn default_data_root() -> PathBuf {
    default_state_root().join("data")
}

/// Root for daemon-private state (lock markers, scratch files, log).
pub fn default_state_root() -> PathBuf {
    match data_dir() {
        Some(mut base) => {
            base.push(APP_DIR);
            base
        }
        None => home_fallback(&[".local", "share", APP_DIR]),
    }
}

/// OS-appropriate default log file path (data dir).
pub fn default_log_path() -> Option<PathBuf> {
    let base = default_state_root();
    // ensure dir exists (best-effort)
    let _ = fs::create_dir_all(&base);
    Some(base.join("pe_watch.log"))
}

/// Return true if any existing ancestor of `path` is a symlink.
pub fn path_has_symlink_ancestor(path: &Path) -> io::Result<bool> {
    let mut p = path.parent();
    while let Some(anc) = p {
        if anc.exists() {
            let meta = fs::symlink_metadata(anc)?;
            if meta.file_type().is_symlink() {
                return Ok(true);
            }
        }
        p = anc.parent();
    }
    Ok(false)
}
