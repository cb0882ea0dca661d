use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static SEQ: AtomicU64 = AtomicU64::new(0);

/// `<pid>_<nanos>_<seq>`: unique within the host for the life of the process.
pub(crate) fn unique_token() -> String {
    let pid = std::process::id();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{pid}_{nanos}_{seq}")
}

/// Hidden temp sibling used while copying into `dst_dir`.
pub(super) fn unique_temp_path(dst_dir: &Path) -> PathBuf {
    dst_dir.join(format!(".pe_watch.{}.tmp", unique_token()))
}

pub(super) fn is_cross_device(e: &io::Error) -> bool {
    match e.raw_os_error() {
        #[cfg(unix)]
        Some(code) => code == libc::EXDEV,
        #[cfg(windows)]
        Some(code) => code == 17,
        #[cfg(not(any(unix, windows)))]
        Some(_) => false,
        None => false,
    }
}

#[cfg(unix)]
pub(super) fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub(super) fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// True for names the stages must never touch: in-flight, discard pending or our temp files.
pub fn is_hidden_or_locked(name: &str) -> bool {
    name.starts_with(".pe_watch.")
        || name.ends_with(super::container::IN_FLIGHT_SUFFIX)
        || name.ends_with(super::container::DISCARD_SUFFIX)
}
