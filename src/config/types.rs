//! Core configuration types.
//! - Config holds runtime settings with sensible defaults.
//! - LogLevel represents verbosity with simple parsing helpers.
//! - MaxConcurrency is the validated worker bound shared by every stage pool.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

use super::paths;
use super::{
    DEFAULT_ARTIFACT_PATTERN, DEFAULT_BASE_INTERVAL, DEFAULT_DISCARD_PATTERN, DEFAULT_FS_TIMEOUT,
    DEFAULT_MULTIPLIER, DEFAULT_QUIET_PERIOD, DEFAULT_SIZE_THRESHOLD,
};

/// Console verbosity accepted in the config file and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Errors only
    Quiet,
    /// Stage reports and lifecycle events (default)
    #[default]
    Normal,
    /// Per-item decisions
    Info,
    /// Everything, including retries and tick traces
    Debug,
}

impl LogLevel {
    /// Case-insensitive; accepts a few common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" => Some(LogLevel::Normal),
            "info" | "verbose" | "detailed" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// Upper bound on concurrent workers inside one stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MaxConcurrency(usize);

impl MaxConcurrency {
    pub const MIN: usize = 1;
    pub const MAX: usize = 9;
    pub const DEFAULT: MaxConcurrency = MaxConcurrency(5);

    /// Validate a raw value against the 1..=9 bound.
    pub fn new(value: i64) -> Result<Self, ConfigError> {
        if value >= Self::MIN as i64 && value <= Self::MAX as i64 {
            Ok(Self(value as usize))
        } else {
            Err(ConfigError::OutOfRange {
                name: "max_concurrency",
                value,
                min: Self::MIN as i64,
                max: Self::MAX as i64,
            })
        }
    }

    /// Parse a textual value (XML, CLI, control plane).
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let trimmed = s.trim();
        let value = trimmed.parse::<i64>().map_err(|_| ConfigError::Invalid {
            name: "max_concurrency",
            value: trimmed.to_string(),
        })?;
        Self::new(value)
    }

    /// Lenient variant used on hot paths: invalid input becomes the default.
    pub fn or_default(value: i64) -> Self {
        match Self::new(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, fallback = Self::DEFAULT.0, "Invalid max_concurrency; using default");
                Self::DEFAULT
            }
        }
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for MaxConcurrency {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for MaxConcurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime configuration used by the daemon and the stages.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the detector drops raw artifacts
    pub raw_dir: PathBuf,
    /// Validated staging containers
    pub temp_dir: PathBuf,
    /// Merged containers waiting for publication
    pub proc_dir: PathBuf,
    /// Sub-path below output_root receiving published files (may be empty)
    pub output_dir: PathBuf,
    /// Durable storage root
    pub output_root: PathBuf,
    /// Worker bound for every stage pool
    pub max_concurrency: MaxConcurrency,
    /// Execution-lock marker directory
    pub lock_dir: PathBuf,
    /// Scratch area used for markers when lock_dir is unusable
    pub scratch_dir: PathBuf,
    /// Console verbosity
    pub log_level: LogLevel,
    /// Optional path to a log file
    pub log_file: Option<PathBuf>,
    /// Nominal scheduler period (one tick unit)
    pub base_interval: Duration,
    /// Sub-divisions of the base interval per counter increment
    pub multiplier: u32,
    /// Retry budget for a single filesystem operation
    pub fs_timeout: Duration,
    /// Minimum age of a file before it is considered stable
    pub quiet_period: Duration,
    /// Minimum size in bytes of artifact and sidecar
    pub size_threshold: u64,
    /// Raw entries matching this regex are deleted
    pub discard_pattern: String,
    /// Raw entries matching this regex are promotion candidates
    pub artifact_pattern: String,
}

impl Default for Config {
    fn default() -> Self {
        let data = paths::default_data_root();
        let state = paths::default_state_root();
        Self {
            raw_dir: data.join("raw"),
            temp_dir: data.join("temp"),
            proc_dir: data.join("proc"),
            output_dir: PathBuf::new(),
            output_root: data.join("output"),
            max_concurrency: MaxConcurrency::DEFAULT,
            lock_dir: state.join("locks"),
            scratch_dir: state.join("tmp"),
            log_level: LogLevel::Normal,
            log_file: paths::default_log_path(),
            base_interval: DEFAULT_BASE_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            fs_timeout: DEFAULT_FS_TIMEOUT,
            quiet_period: DEFAULT_QUIET_PERIOD,
            size_threshold: DEFAULT_SIZE_THRESHOLD,
            discard_pattern: DEFAULT_DISCARD_PATTERN.to_string(),
            artifact_pattern: DEFAULT_ARTIFACT_PATTERN.to_string(),
        }
    }
}

impl Config {
    /// Construct a Config whose stage, lock and scratch directories all live below `root`.
    pub fn with_data_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            raw_dir: root.join("raw"),
            temp_dir: root.join("temp"),
            proc_dir: root.join("proc"),
            output_root: root.join("output"),
            lock_dir: root.join("locks"),
            scratch_dir: root.join("tmp"),
            log_file: None,
            ..Default::default()
        }
    }

    /// Directory receiving published files: output_root joined with the output sub-path.
    pub fn output_target(&self) -> PathBuf {
        if self.output_dir.as_os_str().is_empty() {
            self.output_root.clone()
        } else {
            self.output_root.join(&self.output_dir)
        }
    }

    /// Length of one scheduler sleep quantum.
    pub fn tick_quantum(&self) -> Duration {
        self.base_interval / self.multiplier.max(1)
    }
}
