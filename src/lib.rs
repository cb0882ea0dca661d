//! Core library for `pe_watch`.
//!
//! A detector data-watch daemon: a tick scheduler fires three stages (intake, merge,
//! finalize) that promote artifact/sidecar pairs from the raw capture directory through
//! staging and merge directories into durable output storage. Stages coordinate only
//! through the filesystem: container names carry their state (`.lock`, `.dump`) and a
//! marker file per stage prevents re-entry.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod fs_ops;
pub mod header;
pub mod output;
pub mod platform;
pub mod plugin;
pub mod pool;
pub mod scheduler;
pub mod shutdown;
pub mod stages;

pub use config::{
    Config, LogLevel, MaxConcurrency, SharedConfig, default_config_path, default_log_path,
    path_has_symlink_ancestor,
};
pub use daemon::Daemon;
pub use errors::{ConfigError, RegistrationError, WatchError};
pub use fs_ops::{Container, ContainerState, ExecutionGuard, LockDir, ResilientFs};
pub use plugin::{PluginDescriptor, RunState, Stage, StageContext, StageDirs, StageReport};
pub use pool::WorkerPool;
pub use scheduler::{RunSummary, Scheduler, Tick, is_due};
pub use shutdown::StopSignal;
pub use stages::{Finalize, Intake, Merge, default_stages, stage_by_name};
