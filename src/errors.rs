//! Typed error definitions for pe_watch.
//! Provides a small set of well-known failure modes for better logs and tests.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Source path not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Timed out after {elapsed_ms} ms trying to {op} '{path}': {last_error}")]
    IoTimeout {
        op: &'static str,
        path: PathBuf,
        elapsed_ms: u64,
        last_error: String,
    },

    #[error("Execution lock '{0}' is already held")]
    LockContention(String),

    #[error("Insufficient disk space for destination {dest}: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        required: u64,
        available: u64,
        dest: PathBuf,
    },

    #[error("Operation interrupted by stop request")]
    Interrupted,
}

impl WatchError {
    /// Stable numeric code for structured logs.
    pub fn code(&self) -> u16 {
        match self {
            WatchError::SourceMissing(_) => 10,
            WatchError::IoTimeout { .. } => 11,
            WatchError::LockContention(_) => 20,
            WatchError::InsufficientSpace { .. } => 30,
            WatchError::Interrupted => 40,
        }
    }
}

/// Rejected configuration values. Setters return these without touching stored state;
/// loaders log them and fall back to compiled-in defaults.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not an existing directory: {path}")]
    DirectoryMissing { name: &'static str, path: PathBuf },

    #[error("{name} value {value} is outside the allowed range {min}..={max}")]
    OutOfRange {
        name: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{name} value '{value}' is invalid")]
    Invalid { name: &'static str, value: String },
}

impl ConfigError {
    pub fn code(&self) -> u16 {
        match self {
            ConfigError::DirectoryMissing { .. } => 50,
            ConfigError::OutOfRange { .. } => 51,
            ConfigError::Invalid { .. } => 52,
        }
    }
}

/// Malformed tick metadata on a stage; the stage is excluded at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("stage '{0}' does not declare a tick period")]
    MissingTickPeriod(String),

    #[error("stage '{0}' does not declare a tick offset")]
    MissingTickOffset(String),

    #[error("stage '{0}' declares a zero tick period")]
    ZeroTickPeriod(String),
}
