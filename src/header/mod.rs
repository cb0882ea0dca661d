//! Header merge: sidecar fields into the artifact and its companion tree.

pub mod companion;
pub mod metadata;
pub mod tiff;

pub use companion::{COMPANION_EXT, Companion, companion_path, write_companion};
pub use metadata::{HEADER_SCAN_LINES, Header, parse_header, read_header};
pub use tiff::{TiffMerge, merge_into_tiff, read_description};
