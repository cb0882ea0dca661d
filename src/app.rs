//! Application orchestrator.
//! Loads/merges config, initializes logging, installs the signal handler and runs the
//! requested command: the daemon loop, a single stage, or the stage table.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;

use pe_watch::cli::{Args, Command, StageName};
use pe_watch::config::{CONFIG_ENV, LoadResult, load_or_init, validate_and_normalize};
use pe_watch::fs_ops::LockDir;
use pe_watch::output as out;
use pe_watch::plugin::{PluginDescriptor, plugin_info, register_all};
use pe_watch::{
    Config, Daemon, SharedConfig, StageContext, StopSignal, default_config_path, default_stages,
    stage_by_name,
};

use crate::logging::init_tracing;

fn print_config_location(explicit: Option<&Path>) {
    if let Some(p) = explicit {
        out::print_info(&format!("Using --config (explicit):\n  {}\n", p.display()));
        return;
    }
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        out::print_info(&format!("Using {CONFIG_ENV} (explicit):\n  {env_path}\n"));
        out::print_info(&format!("To override, unset {CONFIG_ENV} or set it to another file."));
        return;
    }
    match default_config_path() {
        Some(p) => {
            out::print_info(&format!("Default pe_watch config path:\n  {}\n", p.display()));
            if p.exists() {
                out::print_info("A config file already exists at that location.");
            } else {
                out::print_info("No config file exists there yet. Run without --print-config to create a template.");
            }
        }
        None => out::print_error("Could not determine a default config path"),
    }
}

/// Run the CLI application.
pub fn run(args: Args) -> Result<()> {
    // Handle --print-config before logging init
    if args.print_config {
        print_config_location(args.config.as_deref());
        return Ok(());
    }

    let mut cfg = match load_or_init(args.config.as_deref())? {
        LoadResult::Loaded(cfg, _) => *cfg,
        LoadResult::CreatedTemplate(path) => {
            out::print_success(&format!("A template pe_watch config was written to: {}", path.display()));
            out::print_info("Edit the stage directories (raw_dir, temp_dir, proc_dir, output_root) and re-run.");
            out::print_info(&format!("To use a different location set {CONFIG_ENV} or pass --config."));
            return Ok(());
        }
        LoadResult::Defaults => Config::default(),
    };
    args.apply_overrides(&mut cfg);

    let guard = init_tracing(cfg.log_level, cfg.log_file.as_deref(), args.json).inspect_err(|e| {
        out::print_error(&format!("Failed to initialize logging: {e}"));
    })?;

    // Guard is dropped on the signal to flush the file appender.
    let guard_slot: Arc<Mutex<Option<WorkerGuard>>> = Arc::new(Mutex::new(guard));
    let stop = StopSignal::new();
    {
        let guard_slot = Arc::clone(&guard_slot);
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            if stop.is_requested() {
                // Second interrupt: stop waiting for the drain.
                if let Ok(mut g) = guard_slot.lock() {
                    let _ = g.take();
                }
                std::process::exit(130);
            }
            stop.request();
            out::print_warn("Received interrupt; finishing running stages...");
        })
        .context("install signal handler")?;
    }

    debug!(?args, "Starting pe_watch");
    let problems = validate_and_normalize(&mut cfg);
    if !problems.is_empty() {
        out::print_warn(&format!("{} configuration value(s) replaced by defaults; see log", problems.len()));
    }

    let result = match args.command() {
        Command::Plugins => {
            let plugins = register_all(default_stages(), u64::from(cfg.multiplier.max(1)));
            out::print_user(plugin_info(&plugins).trim_end());
            Ok(())
        }
        Command::Stage { name, unlock } => run_stage(cfg, name, unlock, stop),
        Command::Run => run_daemon(cfg, stop),
    };

    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "pe_watch failed");
    }
    // Ensure logs are flushed before exit
    if let Ok(mut g) = guard_slot.lock() {
        let _ = g.take();
    }
    result
}

fn run_stage(cfg: Config, name: StageName, unlock: bool, stop: StopSignal) -> Result<()> {
    let stage = stage_by_name(name.as_str())
        .with_context(|| format!("unknown stage '{}'", name.as_str()))?;
    let descriptor = PluginDescriptor::register(stage, u64::from(cfg.multiplier.max(1)))?;
    let locks = LockDir::resolve(&cfg.lock_dir, &cfg.scratch_dir).context("resolve execution lock directory")?;
    let ctx = StageContext::new(cfg, stop);

    match descriptor.execute(&ctx, &locks, unlock)? {
        Some(report) => {
            out::print_report(descriptor.name(), &report);
            Ok(())
        }
        None => {
            out::print_warn(&format!(
                "Stage '{}' is locked by another run; use --unlock to clear a stale lock",
                descriptor.name()
            ));
            Ok(())
        }
    }
}

fn run_daemon(cfg: Config, stop: StopSignal) -> Result<()> {
    let daemon = Daemon::with_default_stages(SharedConfig::new(cfg))?;
    info!(stages = %daemon.plugin_info().trim_end(), "Loaded stages");

    daemon.start()?;
    // Ctrl-C raises `stop`; the daemon flag itself is raised by `Daemon::stop`.
    while !stop.is_requested() && daemon.is_running() {
        thread::sleep(Duration::from_millis(100));
    }
    match daemon.stop(Duration::from_secs(5)) {
        Some(summary) => info!(ticks = summary.ticks, launched = summary.launched, "Daemon stopped"),
        None => out::print_warn("Scheduler did not stop in time"),
    }
    Ok(())
}
