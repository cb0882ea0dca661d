//! Disk space checks before publication.
//! Sums the source tree and compares it with the space available at the destination.

use std::fs;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::errors::WatchError;

use super::helpers::io_error_with_help;

// Headroom kept free on the facility share.
const CUSHION: u64 = 4 * 1024 * 1024;

pub fn format_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.1} GiB", f / GB)
    } else if f >= MB {
        format!("{:.1} MiB", f / MB)
    } else if f >= KB {
        format!("{:.1} KiB", f / KB)
    } else {
        format!("{} B", n)
    }
}

/// Total size of the regular files below `root` (or of `root` itself).
pub fn tree_size(root: &Path) -> u64 {
    match fs::metadata(root) {
        Ok(m) if m.is_file() => m.len(),
        Ok(_) => WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum(),
        Err(_) => 0,
    }
}

/// Fail with `InsufficientSpace` when `required` bytes (plus a cushion) do not fit in `dest_dir`.
pub fn ensure_space_for(dest_dir: &Path, required: u64) -> anyhow::Result<()> {
    let available = fs2::available_space(dest_dir)
        .map_err(io_error_with_help("query free space", dest_dir))?;
    if available < required.saturating_add(CUSHION) {
        warn!(
            dest = %dest_dir.display(),
            required = %format_bytes(required),
            available = %format_bytes(available),
            "Not enough free space"
        );
        return Err(WatchError::InsufficientSpace {
            required,
            available,
            dest: dest_dir.to_path_buf(),
        }
        .into());
    }
    Ok(())
}
