//! Config module.
//! Provides configuration types, default paths, XML loading, validation and the
//! validated get/set surface consumed by the control plane.

pub mod control;
pub mod paths;
pub mod types;
mod validate;
pub mod xml;

use std::time::Duration;

pub use control::SharedConfig;
pub use paths::{default_config_path, default_log_path, path_has_symlink_ancestor};
pub use types::{Config, LogLevel, MaxConcurrency};
pub use validate::{sanitize_output_subdir, validate_and_normalize};
pub use xml::{create_template_config, load_config_from_xml_path, load_or_init, LoadResult};

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "PE_WATCH_CONFIG";

pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MULTIPLIER: u32 = 3;
pub const DEFAULT_FS_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(200);
pub const DEFAULT_SIZE_THRESHOLD: u64 = 8;
pub const DEFAULT_DISCARD_PATTERN: &str = "dark";
pub const DEFAULT_ARTIFACT_PATTERN: &str = r"\.tif$";
