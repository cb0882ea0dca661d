//! Subscriber setup for the binary.
//! Console output is compact text or JSON; a log file, when configured, gets a second
//! non-blocking layer without ANSI colours. The level comes from `LogLevel` only, so
//! RUST_LOG has no effect. A log path below a symlinked directory is refused.

use anyhow::Result;
use chrono::Local;
use pe_watch::output as out;
use pe_watch::platform::open_log_file_secure_append;
use pe_watch::{LogLevel, path_has_symlink_ancestor};
use std::fmt as stdfmt;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt as tsfmt;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry;
use tracing_subscriber::util::SubscriberInitExt;

/// Human-friendly timestamp formatter (DD/MM/YY HH:MM:SS.mmm); ticks are sub-second.
struct LocalHumanTime;
impl FormatTime for LocalHumanTime {
    fn format_time(&self, w: &mut tsfmt::format::Writer<'_>) -> stdfmt::Result {
        write!(w, "{}", Local::now().format("%d/%m/%y %H:%M:%S%.3f"))
    }
}

fn to_level_filter(lvl: LogLevel) -> LevelFilter {
    match lvl {
        LogLevel::Quiet => LevelFilter::ERROR,
        LogLevel::Normal => LevelFilter::INFO,
        LogLevel::Info => LevelFilter::DEBUG,
        LogLevel::Debug => LevelFilter::TRACE,
    }
}

/// Our own crate at the chosen level; dependencies stay at warn.
fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::new(format!("warn,pe_watch={level}"))
}

fn open_file_writer(path: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    match path_has_symlink_ancestor(path) {
        Ok(false) => {}
        Ok(true) => {
            out::print_warn(&format!(
                "Refusing file logging: an ancestor of {} is a symlink",
                path.display()
            ));
            return None;
        }
        Err(e) => {
            out::print_warn(&format!("Could not check log path {}: {e}", path.display()));
            return None;
        }
    }
    match open_log_file_secure_append(path) {
        Ok(file) => Some(tracing_appender::non_blocking(file)),
        Err(e) => {
            out::print_warn(&format!("Could not open log file {}: {e}", path.display()));
            None
        }
    }
}

/// Initialize tracing. Returns the WorkerGuard of the file writer, which must be held
/// until shutdown so buffered lines are flushed.
pub fn init_tracing(lvl: LogLevel, log_file: Option<&Path>, json: bool) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(to_level_filter(lvl));
    let file = log_file.and_then(open_file_writer);
    let (writer, guard) = match file {
        Some((w, g)) => (Some(w), Some(g)),
        None => (None, None),
    };

    // Optional layers keep a single subscriber type across all four combinations.
    if json {
        let stdout_layer = tsfmt::layer()
            .event_format(tsfmt::format().json())
            .with_timer(LocalHumanTime)
            .with_thread_names(true);
        let file_layer = writer.map(|w| {
            tsfmt::layer()
                .event_format(tsfmt::format().json())
                .with_timer(LocalHumanTime)
                .with_thread_names(true)
                .with_writer(w)
        });
        registry().with(filter).with(stdout_layer).with(file_layer).try_init()?;
    } else {
        let stdout_layer = tsfmt::layer()
            .with_timer(LocalHumanTime)
            .with_thread_names(true)
            .compact();
        let file_layer = writer.map(|w| {
            tsfmt::layer()
                .with_timer(LocalHumanTime)
                .with_thread_names(true)
                .with_ansi(false)
                .compact()
                .with_writer(w)
        });
        registry().with(filter).with(stdout_layer).with(file_layer).try_init()?;
    }
    Ok(guard)
}
