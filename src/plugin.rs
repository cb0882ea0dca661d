//! Stage plugin contract.
//!
//! A stage declares its tick metadata, validates it once at registration and does its
//! work over the stage directories. All per-run state lives in a `RunState` owned by
//! the execution, never in the stage itself, so overlapping executions (from the
//! scheduler and a standalone `pe_watch stage` process) share nothing in memory.

use std::fmt;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::{RegistrationError, WatchError};
use crate::fs_ops::{LockDir, ResilientFs};
use crate::pool::WorkerPool;
use crate::scheduler::is_due;
use crate::shutdown::StopSignal;

/// Directories handed to one stage execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDirs {
    pub raw: PathBuf,
    pub temp: PathBuf,
    pub proc: PathBuf,
    pub output: PathBuf,
}

impl StageDirs {
    /// Resolve the directories of `cfg`, creating `output_root/output_dir` on demand.
    /// When it cannot be created, output_root itself is used.
    pub fn from_config(cfg: &Config) -> Self {
        let target = cfg.output_target();
        let output = match fs::create_dir_all(&target) {
            Ok(()) => target,
            Err(e) => {
                error!(output = %target.display(), fallback = %cfg.output_root.display(), error = %e, "Could not create output directory; using output root");
                cfg.output_root.clone()
            }
        };
        Self {
            raw: cfg.raw_dir.clone(),
            temp: cfg.temp_dir.clone(),
            proc: cfg.proc_dir.clone(),
            output,
        }
    }
}

/// Everything a stage needs for one run.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub dirs: StageDirs,
    pub config: Config,
    pub pool: WorkerPool,
    pub fs: ResilientFs,
    pub stop: StopSignal,
}

impl StageContext {
    pub fn new(cfg: Config, stop: StopSignal) -> Self {
        Self {
            dirs: StageDirs::from_config(&cfg),
            pool: WorkerPool::new(cfg.max_concurrency),
            fs: ResilientFs::new(cfg.fs_timeout),
            config: cfg,
            stop,
        }
    }

    /// Error for items that were not started because a stop was requested.
    pub fn interrupted(&self) -> Option<WatchError> {
        self.stop.is_requested().then_some(WatchError::Interrupted)
    }
}

/// Per-run outcome counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    pub promoted: usize,
    pub discarded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "promoted={} discarded={} skipped={} failed={}",
            self.promoted, self.discarded, self.skipped, self.failed
        )
    }
}

/// State accumulated during one run; reset by `Stage::cleanup`.
#[derive(Debug, Default)]
pub struct RunState {
    pub queued: Vec<PathBuf>,
    pub report: StageReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSpec {
    pub period: u64,
    pub offset: u64,
}

pub trait Stage: Send + Sync {
    /// Name used for logs and as the execution lock identity.
    fn name(&self) -> &str;

    fn tick_period(&self) -> Option<u64>;

    fn tick_offset(&self) -> Option<u64>;

    /// Registration-time check of the tick metadata.
    fn validate(&self) -> Result<TickSpec, RegistrationError> {
        let name = self.name().to_string();
        let period = self
            .tick_period()
            .ok_or_else(|| RegistrationError::MissingTickPeriod(name.clone()))?;
        let offset = self
            .tick_offset()
            .ok_or_else(|| RegistrationError::MissingTickOffset(name.clone()))?;
        if period == 0 {
            return Err(RegistrationError::ZeroTickPeriod(name));
        }
        Ok(TickSpec { period, offset })
    }

    fn work(&self, ctx: &StageContext, run: &mut RunState) -> anyhow::Result<()>;

    /// Runs after `work`, whether it succeeded, failed or panicked.
    fn cleanup(&self, run: &mut RunState) {
        run.queued.clear();
    }
}

/// A validated stage with its effective tick metadata.
#[derive(Clone)]
pub struct PluginDescriptor {
    stage: Arc<dyn Stage>,
    spec: TickSpec,
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name())
            .field("spec", &self.spec)
            .finish()
    }
}

impl PluginDescriptor {
    /// Validate a stage; a period below `base_period` is clamped up with a warning.
    pub fn register(stage: Arc<dyn Stage>, base_period: u64) -> Result<Self, RegistrationError> {
        let mut spec = stage.validate()?;
        if spec.period < base_period {
            warn!(stage = stage.name(), period = spec.period, base_period, "Tick period below base period; clamping");
            spec.period = base_period;
        }
        Ok(Self { stage, spec })
    }

    pub fn name(&self) -> &str {
        self.stage.name()
    }

    pub fn period(&self) -> u64 {
        self.spec.period
    }

    pub fn offset(&self) -> u64 {
        self.spec.offset
    }

    pub fn is_due(&self, counter: u64) -> bool {
        is_due(counter, self.spec.period, self.spec.offset)
    }

    /// Run the stage once under its execution lock.
    /// Returns `Ok(None)` when another run holds the lock; this run is skipped.
    pub fn execute(
        &self,
        ctx: &StageContext,
        locks: &LockDir,
        force_unlock: bool,
    ) -> anyhow::Result<Option<StageReport>> {
        let name = self.name();
        if force_unlock {
            locks.force_unlock(name)?;
        }
        let guard = match locks.try_acquire(name) {
            Ok(g) => g,
            Err(e) => match e.downcast_ref::<WatchError>() {
                Some(WatchError::LockContention(_)) => {
                    debug!(stage = name, "Stage is locked; skipping this tick");
                    return Ok(None);
                }
                _ => return Err(e),
            },
        };

        let start = Instant::now();
        let mut run = RunState::default();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.stage.work(ctx, &mut run)));
        self.stage.cleanup(&mut run);
        drop(guard);

        let report = run.report;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(())) => {
                if report != StageReport::default() {
                    info!(stage = name, %report, elapsed_ms, "Stage run finished");
                } else {
                    debug!(stage = name, elapsed_ms, "Stage run finished; nothing to do");
                }
                Ok(Some(report))
            }
            Ok(Err(e)) => {
                error!(stage = name, %report, error = %format!("{e:#}"), "Stage run failed");
                Err(e)
            }
            Err(_) => {
                error!(stage = name, %report, "Stage run panicked");
                Err(anyhow::anyhow!("stage '{name}' panicked"))
            }
        }
    }
}

/// Validate every stage; those with malformed metadata are excluded with an error log.
pub fn register_all(stages: Vec<Arc<dyn Stage>>, base_period: u64) -> Vec<PluginDescriptor> {
    stages
        .into_iter()
        .filter_map(|stage| match PluginDescriptor::register(stage, base_period) {
            Ok(d) => {
                debug!(stage = d.name(), period = d.period(), offset = d.offset(), "Stage registered");
                Some(d)
            }
            Err(e) => {
                error!(error = %e, "Stage excluded");
                None
            }
        })
        .collect()
}

/// Human-readable table of the registered stages.
pub fn plugin_info(plugins: &[PluginDescriptor]) -> String {
    if plugins.is_empty() {
        return "No plugin has been found".to_string();
    }
    let width = plugins.iter().map(|p| p.name().len()).max().unwrap_or(0).max(5);
    let mut out = format!("{:<width$}  {:>6}  {:>6}\n", "stage", "period", "offset");
    for p in plugins {
        out.push_str(&format!(
            "{:<width$}  {:>6}  {:>6}\n",
            p.name(),
            p.period(),
            p.offset()
        ));
    }
    out
}
