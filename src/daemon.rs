//! Daemon lifecycle: stage registration, lock sweep, start and stop.
//!
//! This is the surface a control plane drives: `start`, `stop`, `plugin_info` and the
//! validated configuration handle returned by `config()`.

use anyhow::{Context, Result, bail};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, sleep};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::SharedConfig;
use crate::fs_ops::LockDir;
use crate::plugin::{PluginDescriptor, Stage, plugin_info, register_all};
use crate::scheduler::{RunSummary, Scheduler};
use crate::shutdown::StopSignal;
use crate::stages::default_stages;

pub struct Daemon {
    config: SharedConfig,
    plugins: Vec<PluginDescriptor>,
    locks: LockDir,
    stop: StopSignal,
    handle: Mutex<Option<JoinHandle<RunSummary>>>,
}

impl Daemon {
    /// Register `stages` and sweep all execution locks left by a previous process.
    pub fn new(config: SharedConfig, stages: Vec<Arc<dyn Stage>>) -> Result<Self> {
        let cfg = config.snapshot();
        let plugins = register_all(stages, u64::from(cfg.multiplier.max(1)));
        let locks = LockDir::resolve(&cfg.lock_dir, &cfg.scratch_dir)
            .context("resolve execution lock directory")?;
        locks.sweep().context("sweep stale execution locks")?;
        Ok(Self {
            config,
            plugins,
            locks,
            stop: StopSignal::new(),
            handle: Mutex::new(None),
        })
    }

    /// Daemon with the intake, merge and finalize stages.
    pub fn with_default_stages(config: SharedConfig) -> Result<Self> {
        Self::new(config, default_stages())
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn plugins(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    pub fn plugin_info(&self) -> String {
        plugin_info(&self.plugins)
    }

    pub fn locks(&self) -> &LockDir {
        &self.locks
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.plugins.clone(),
            self.config.clone(),
            self.locks.clone(),
            self.stop.clone(),
        )
    }

    pub fn is_running(&self) -> bool {
        let guard = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        guard.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Launch the scheduler loop on a background thread.
    pub fn start(&self) -> Result<()> {
        let mut guard = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            bail!("daemon is already running");
        }
        self.stop.reset();
        let scheduler = self.scheduler();
        let h = thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || scheduler.run())
            .context("spawn scheduler thread")?;
        *guard = Some(h);
        info!("Daemon started");
        Ok(())
    }

    /// Run the scheduler loop on the calling thread until the stop signal is raised.
    pub fn run_foreground(&self) -> RunSummary {
        self.stop.reset();
        self.scheduler().run()
    }

    /// Raise the stop flag and wait up to `wait` for the scheduler loop to end.
    /// Returns the run summary when the loop ended in time.
    pub fn stop(&self, wait: Duration) -> Option<RunSummary> {
        info!("Stop requested");
        self.stop.request();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()?;

        let deadline = Instant::now() + wait;
        while !handle.is_finished() && Instant::now() < deadline {
            sleep(Duration::from_millis(10));
        }
        if !handle.is_finished() {
            warn!("Scheduler did not stop in time; leaving it to finish");
            return None;
        }
        match handle.join() {
            Ok(summary) => Some(summary),
            Err(_) => {
                warn!("Scheduler thread panicked");
                None
            }
        }
    }
}
