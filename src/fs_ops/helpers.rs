//! I/O helper utilities.
//!
//! Small adapters that enrich io::Error with the operation, the path and a platform hint,
//! usable with map_err in both io::Result and anyhow::Result code paths.
//!
//! Usage:
//!   // in functions returning anyhow::Result<_>
//!   fs::create_dir_all(dir).map_err(io_error_with_help("create output directory", dir))?;
//!
//!   // in functions returning io::Result<_>
//!   File::open(p).map_err(io_error_with_help_io("open sidecar", p))?;

use anyhow::anyhow;
use std::io;
use std::path::Path;

/// Hint for a raw OS error code, if we know one.
fn os_hint(code: i32) -> Option<&'static str> {
    #[cfg(unix)]
    {
        match code {
            libc::EACCES | libc::EPERM => {
                Some("permission denied; the detector PC share may still hold the file")
            }
            libc::EXDEV => Some("cross-filesystem; falling back to copy and delete"),
            libc::EBUSY | libc::ETXTBSY => Some("resource busy; another writer is active"),
            libc::ENOENT => Some("path not found; another stage may have taken it"),
            libc::EEXIST | libc::ENOTEMPTY => {
                Some("already exists; a container with this name is present")
            }
            libc::ENOSPC => Some("no space left on device"),
            libc::EROFS => Some("read-only filesystem"),
            libc::ENAMETOOLONG => Some("path too long"),
            libc::EMFILE | libc::ENFILE => Some("file descriptor limit reached"),
            _ => None,
        }
    }
    #[cfg(windows)]
    {
        match code {
            5 => Some("access denied; check permissions"),
            17 => Some("not same device; falling back to copy and delete"),
            32 | 33 => Some("sharing violation; the file is still open elsewhere"),
            2 | 3 => Some("path not found; another stage may have taken it"),
            80 | 183 => Some("already exists; a container with this name is present"),
            112 => Some("insufficient disk space"),
            206 => Some("path too long"),
            _ => None,
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = code;
        None
    }
}

fn kind_hint(kind: io::ErrorKind) -> Option<&'static str> {
    match kind {
        io::ErrorKind::PermissionDenied => Some("permission denied"),
        io::ErrorKind::NotFound => Some("path not found"),
        io::ErrorKind::AlreadyExists => Some("already exists"),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Some("busy; retry later"),
        _ => None,
    }
}

/// Format "op 'path': error (hint) [os code: N]".
pub(crate) fn build_message(op: &str, path: &Path, e: &io::Error) -> String {
    let mut msg = format!("{} '{}': {}", op, path.display(), e);
    match e.raw_os_error() {
        Some(code) => {
            if let Some(hint) = os_hint(code) {
                msg.push_str(&format!(" ({hint})"));
            }
            msg.push_str(&format!(" [os code: {code}]"));
        }
        None => {
            if let Some(hint) = kind_hint(e.kind()) {
                msg.push_str(&format!(" ({hint})"));
            }
        }
    }
    msg
}

/// Adapter for anyhow::Result code.
pub fn io_error_with_help<'a>(
    op: &'a str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> anyhow::Error + 'a {
    move |e: io::Error| anyhow!(build_message(op, path, &e))
}

/// Adapter for io::Result code; keeps the original ErrorKind.
pub fn io_error_with_help_io<'a>(
    op: &'a str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> io::Error + 'a {
    move |e: io::Error| io::Error::new(e.kind(), build_message(op, path, &e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_op_and_path() {
        let e = io::Error::new(io::ErrorKind::NotFound, "gone");
        let msg = build_message("move artifact", Path::new("/raw/a.tif"), &e);
        assert!(msg.starts_with("move artifact '/raw/a.tif': gone"));
        assert!(msg.contains("path not found"));
    }

    #[cfg(unix)]
    #[test]
    fn os_code_is_appended() {
        let e = io::Error::from_raw_os_error(libc::ENOSPC);
        let msg = build_message("copy", Path::new("/out"), &e);
        assert!(msg.contains("no space left"));
        assert!(msg.contains(&format!("[os code: {}]", libc::ENOSPC)));
    }

    #[test]
    fn io_variant_keeps_kind() {
        let e = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let wrapped = io_error_with_help_io("open", Path::new("x"))(e);
        assert_eq!(wrapped.kind(), io::ErrorKind::PermissionDenied);
    }
}
