//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - Running without a subcommand is the same as `run`.
//! - --debug is a shorthand for --log-level debug.

use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

use crate::config::types::{Config, LogLevel, MaxConcurrency};
use crate::config::sanitize_output_subdir;

/// Detector data-watch daemon.
/// CLI flags override config values (which are loaded from XML if present).
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Promote detector frames from raw capture to durable storage"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file to use instead of PE_WATCH_CONFIG / the default location.
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Override the raw capture directory.
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    pub raw_dir: Option<PathBuf>,

    /// Override the staging directory.
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    pub temp_dir: Option<PathBuf>,

    /// Override the merged-data directory.
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    pub proc_dir: Option<PathBuf>,

    /// Override the durable output root.
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    pub output_root: Option<PathBuf>,

    /// Sub-path below the output root (punctuation is stripped).
    #[arg(long, global = true)]
    pub output_dir: Option<String>,

    /// Worker threads per stage run (1-9).
    #[arg(long, global = true)]
    pub max_concurrency: Option<i64>,

    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(short = 'd', long, global = true, help = "Enable debug logging (shorthand for --log-level debug)")]
    pub debug: bool,

    /// Set log level. One of: quiet, normal, info, debug.
    #[arg(long, global = true, help = "Set log level: quiet, normal, info, debug")]
    pub log_level: Option<String>,

    /// Also write logs to this file.
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    /// Emit logs in structured JSON (includes timestamp, level, and structured fields).
    #[arg(long, global = true, help = "Emit logs in structured JSON")]
    pub json: bool,

    /// Print where pe_watch will look for the config file (or PE_WATCH_CONFIG if set), then exit.
    #[arg(long, help = "Print the config file location used by pe_watch and exit")]
    pub print_config: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the scheduler in the foreground until interrupted (default).
    Run,
    /// Run one stage once, as an independent process.
    Stage {
        #[arg(value_enum)]
        name: StageName,
        /// Clear a stale execution lock before running.
        #[arg(long)]
        unlock: bool,
    },
    /// List the registered stages with their tick period and offset.
    Plugins,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageName {
    Intake,
    Merge,
    Finalize,
}

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Intake => "intake",
            StageName::Merge => "merge",
            StageName::Finalize => "finalize",
        }
    }
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    /// An out-of-range --max-concurrency is reported and replaced by the default.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        let dirs = [
            (&self.raw_dir, &mut cfg.raw_dir),
            (&self.temp_dir, &mut cfg.temp_dir),
            (&self.proc_dir, &mut cfg.proc_dir),
            (&self.output_root, &mut cfg.output_root),
        ];
        for (flag, slot) in dirs {
            if let Some(p) = flag {
                *slot = p.clone();
            }
        }
        if let Some(sub) = &self.output_dir {
            cfg.output_dir = sanitize_output_subdir(sub);
        }
        if let Some(n) = self.max_concurrency {
            cfg.max_concurrency = MaxConcurrency::or_default(n);
        }
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
        if let Some(f) = &self.log_file {
            cfg.log_file = Some(f.clone());
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}
