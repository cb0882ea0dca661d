//! Tick scheduler.
//!
//! One free-running counter advances per sleep quantum (`base_interval / multiplier`).
//! Every registered stage whose period and offset match the counter gets one execution
//! on its own thread. The loop never waits for those threads; overlapping runs of the
//! same stage are prevented by the execution lock, not by the scheduler.

use std::thread::{self, JoinHandle, sleep};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::SharedConfig;
use crate::fs_ops::LockDir;
use crate::plugin::{PluginDescriptor, StageContext};
use crate::shutdown::StopSignal;

/// Counter value at which the tick wraps around.
pub const TICK_CEILING: u64 = 10_000;

/// Default bound on the wait for running stages once the loop has stopped.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

// Upper bound on one uninterrupted sleep so a stop request is noticed quickly.
const STOP_POLL: Duration = Duration::from_millis(50);

/// A stage is due iff `counter - offset` is positive and a multiple of `period`.
pub fn is_due(counter: u64, period: u64, offset: u64) -> bool {
    if period == 0 || counter <= offset {
        return false;
    }
    (counter - offset) % period == 0
}

/// Scheduler counter; starts at 1 and is never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick(u64);

impl Default for Tick {
    fn default() -> Self {
        Tick(1)
    }
}

impl Tick {
    pub fn get(self) -> u64 {
        self.0
    }

    /// Advance by one; on reaching the ceiling restart at 2 (even ceiling) or 1 (odd),
    /// which keeps the parity of every period that divides 2.
    pub fn advance(&mut self) {
        self.0 += 1;
        if self.0 >= TICK_CEILING {
            self.0 = if TICK_CEILING % 2 == 0 { 2 } else { 1 };
        }
    }
}

/// What a scheduler run did, for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub launched: usize,
    pub abandoned: usize,
}

pub struct Scheduler {
    plugins: Vec<PluginDescriptor>,
    config: SharedConfig,
    locks: LockDir,
    stop: StopSignal,
    join_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        plugins: Vec<PluginDescriptor>,
        config: SharedConfig,
        locks: LockDir,
        stop: StopSignal,
    ) -> Self {
        Self {
            plugins,
            config,
            locks,
            stop,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    fn spawn(&self, plugin: &PluginDescriptor, ctx: StageContext) -> Option<JoinHandle<()>> {
        let plugin = plugin.clone();
        let locks = self.locks.clone();
        let name = plugin.name().to_string();
        let spawned = thread::Builder::new()
            .name(format!("stage-{name}"))
            .spawn(move || {
                // Failures are logged by execute; the scheduler only cares that the thread ends.
                let _ = plugin.execute(&ctx, &locks, false);
            });
        match spawned {
            Ok(h) => Some(h),
            Err(e) => {
                error!(stage = %name, error = %e, "Could not spawn stage thread");
                None
            }
        }
    }

    fn sleep_quantum(&self, quantum: Duration) {
        let until = Instant::now() + quantum;
        while !self.stop.is_requested() {
            let now = Instant::now();
            if now >= until {
                break;
            }
            sleep((until - now).min(STOP_POLL));
        }
    }

    /// Run until the stop signal is raised. Returns immediately when no stage is registered.
    pub fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        if self.plugins.is_empty() {
            error!("No stages registered; scheduler exiting");
            return summary;
        }

        let mut tick = Tick::default();
        let mut live: Vec<JoinHandle<()>> = Vec::new();
        info!(stages = self.plugins.len(), "Scheduler started");

        while !self.stop.is_requested() {
            let due: Vec<&PluginDescriptor> =
                self.plugins.iter().filter(|p| p.is_due(tick.get())).collect();

            let cfg = self.config.stage_config();
            for plugin in due {
                trace!(stage = plugin.name(), counter = tick.get(), "stage due");
                let ctx = StageContext::new(cfg.clone(), self.stop.clone());
                if let Some(h) = self.spawn(plugin, ctx) {
                    live.push(h);
                    summary.launched += 1;
                }
            }
            // Reap finished executions so the list stays short.
            live.retain(|h| !h.is_finished());

            self.sleep_quantum(cfg.tick_quantum());
            tick.advance();
            summary.ticks += 1;
        }

        summary.abandoned = self.drain(live);
        info!(ticks = summary.ticks, launched = summary.launched, abandoned = summary.abandoned, "Scheduler stopped");
        summary
    }

    /// Wait up to the join timeout for running stages; the rest are left to finish on their own.
    fn drain(&self, mut live: Vec<JoinHandle<()>>) -> usize {
        let deadline = Instant::now() + self.join_timeout;
        loop {
            let (done, pending): (Vec<_>, Vec<_>) = live.into_iter().partition(|h| h.is_finished());
            for h in done {
                if h.join().is_err() {
                    warn!("Stage thread ended with a panic");
                }
            }
            live = pending;
            if live.is_empty() || Instant::now() >= deadline {
                break;
            }
            sleep(Duration::from_millis(10));
        }
        if !live.is_empty() {
            warn!(count = live.len(), "Abandoning stage executions still running at stop");
        } else {
            debug!("All stage executions finished");
        }
        live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::plugin::{RunState, Stage};
    use std::sync::Arc;

    #[test]
    fn due_rule() {
        // period 3, offset 1: due at 4, 7, 10
        let due: Vec<u64> = (1..=10).filter(|c| is_due(*c, 3, 1)).collect();
        assert_eq!(due, vec![4, 7, 10]);
        assert!(!is_due(1, 3, 1));
        assert!(!is_due(3, 3, 3));
        assert!(is_due(3, 3, 0));
        assert!(!is_due(5, 0, 0));
    }

    #[test]
    fn tick_starts_at_one_and_wraps() {
        let mut t = Tick::default();
        assert_eq!(t.get(), 1);
        t.advance();
        assert_eq!(t.get(), 2);

        let mut t = Tick(TICK_CEILING - 2);
        t.advance();
        assert_eq!(t.get(), TICK_CEILING - 1);
        t.advance();
        assert_eq!(t.get(), 2);
    }

    #[test]
    fn tick_is_never_zero() {
        let mut t = Tick::default();
        for _ in 0..(2 * TICK_CEILING) {
            t.advance();
            assert!(t.get() >= 1 && t.get() < TICK_CEILING);
        }
    }

    struct Sleeper(Duration);

    impl Stage for Sleeper {
        fn name(&self) -> &str {
            "slow"
        }
        fn tick_period(&self) -> Option<u64> {
            Some(1)
        }
        fn tick_offset(&self) -> Option<u64> {
            Some(0)
        }
        fn work(&self, _ctx: &StageContext, _run: &mut RunState) -> anyhow::Result<()> {
            sleep(self.0);
            Ok(())
        }
    }

    #[test]
    fn slow_stage_neither_blocks_ticks_nor_stop() {
        let td = tempfile::tempdir().unwrap();
        let mut cfg = Config::with_data_root(td.path());
        cfg.base_interval = Duration::from_millis(20);
        cfg.multiplier = 1;
        let locks = LockDir::resolve(&cfg.lock_dir, &cfg.scratch_dir).unwrap();
        let plugin = PluginDescriptor::register(Arc::new(Sleeper(Duration::from_secs(2))), 1).unwrap();
        let stop = StopSignal::new();
        let scheduler = Scheduler::new(vec![plugin], SharedConfig::new(cfg), locks, stop.clone())
            .with_join_timeout(Duration::from_millis(50));

        let stopper = {
            let stop = stop.clone();
            thread::spawn(move || {
                sleep(Duration::from_millis(200));
                stop.request();
            })
        };
        let start = Instant::now();
        let summary = scheduler.run();
        stopper.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(1), "{:?}", start.elapsed());
        assert!(summary.ticks > 2, "{summary:?}");
        assert!(summary.launched > 1, "{summary:?}");
        // Later launches find the lock held and return at once; only the sleeper is left.
        assert_eq!(summary.abandoned, 1);
    }
}
