//! Validated get/set surface over the live configuration.
//!
//! The remote control plane (and the CLI) talk to the daemon only through this handle.
//! Setters validate first and leave stored state untouched on rejection; getters
//! fall back to compiled-in defaults when a stored directory has since vanished.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info};

use crate::errors::ConfigError;

use super::types::{Config, MaxConcurrency};
use super::validate::{check_dir, sanitize_output_subdir};

/// Cloneable handle to the configuration shared by the scheduler and the control plane.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(cfg: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(cfg)),
        }
    }

    // A panicking writer cannot leave Config half-updated (every setter assigns one field).
    fn read(&self) -> RwLockReadGuard<'_, Config> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Config> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> Config {
        self.read().clone()
    }

    pub fn max_concurrency(&self) -> MaxConcurrency {
        self.read().max_concurrency
    }

    pub fn set_max_concurrency(&self, value: i64) -> Result<(), ConfigError> {
        let validated = MaxConcurrency::new(value).inspect_err(|e| {
            error!(code = e.code(), error = %e, "Rejected max_concurrency");
        })?;
        let mut cfg = self.write();
        if cfg.max_concurrency != validated {
            info!(from = %cfg.max_concurrency, to = %validated, "max_concurrency updated");
            cfg.max_concurrency = validated;
        }
        Ok(())
    }

    /// Text form used by control planes that pass strings.
    pub fn set_max_concurrency_str(&self, value: &str) -> Result<(), ConfigError> {
        let validated = MaxConcurrency::parse(value).inspect_err(|e| {
            error!(code = e.code(), error = %e, "Rejected max_concurrency");
        })?;
        self.set_max_concurrency(validated.get() as i64)
    }

    fn set_dir(
        &self,
        name: &'static str,
        value: &Path,
        pick: impl FnOnce(&mut Config) -> &mut PathBuf,
    ) -> Result<(), ConfigError> {
        check_dir(name, value).inspect_err(|e| {
            error!(code = e.code(), error = %e, "Rejected directory");
        })?;
        let mut cfg = self.write();
        let slot = pick(&mut cfg);
        if slot.as_path() != value {
            info!(name, to = %value.display(), "directory updated");
            *slot = value.to_path_buf();
        }
        Ok(())
    }

    pub fn set_raw_dir(&self, value: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.set_dir("raw_dir", value.as_ref(), |c| &mut c.raw_dir)
    }

    pub fn set_temp_dir(&self, value: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.set_dir("temp_dir", value.as_ref(), |c| &mut c.temp_dir)
    }

    pub fn set_proc_dir(&self, value: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.set_dir("proc_dir", value.as_ref(), |c| &mut c.proc_dir)
    }

    pub fn set_output_root(&self, value: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.set_dir("output_root", value.as_ref(), |c| &mut c.output_root)
    }

    /// The sub-path is sanitized rather than rejected; it may be empty.
    pub fn set_output_dir(&self, value: &str) -> PathBuf {
        let clean = sanitize_output_subdir(value);
        let mut cfg = self.write();
        if cfg.output_dir != clean {
            info!(raw = value, to = %clean.display(), "output_dir updated");
            cfg.output_dir = clean.clone();
        }
        clean
    }

    fn get_dir(&self, name: &'static str, pick: impl Fn(&Config) -> PathBuf) -> PathBuf {
        let stored = pick(&self.read());
        match check_dir(name, &stored) {
            Ok(()) => stored,
            Err(e) => {
                let fallback = pick(&Config::default());
                error!(code = e.code(), error = %e, fallback = %fallback.display(), "Failsafe to default directory");
                fallback
            }
        }
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.get_dir("raw_dir", |c| c.raw_dir.clone())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.get_dir("temp_dir", |c| c.temp_dir.clone())
    }

    pub fn proc_dir(&self) -> PathBuf {
        self.get_dir("proc_dir", |c| c.proc_dir.clone())
    }

    pub fn output_root(&self) -> PathBuf {
        self.get_dir("output_root", |c| c.output_root.clone())
    }

    pub fn output_dir(&self) -> PathBuf {
        let dir = self.read().output_dir.clone();
        debug!(output_dir = %dir.display(), "read output_dir");
        dir
    }

    /// Snapshot handed to a stage run: stage directories come from the failsafe getters,
    /// so a directory removed after it was set is replaced by its default.
    pub fn stage_config(&self) -> Config {
        let mut cfg = self.snapshot();
        cfg.raw_dir = self.raw_dir();
        cfg.temp_dir = self.temp_dir();
        cfg.proc_dir = self.proc_dir();
        cfg.output_root = self.output_root();
        cfg
    }
}
