//! User-facing console messages.
//! Prefixes are colored only when stdout is a TTY; logs go through tracing instead.

use owo_colors::OwoColorize;

use crate::plugin::StageReport;

#[derive(Debug, Clone, Copy)]
enum Tone {
    Info,
    Ok,
    Warn,
    Error,
}

fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

fn emit(tone: Tone, msg: &str) {
    let tag = match tone {
        Tone::Info => "info:",
        Tone::Ok => "ok:",
        Tone::Warn => "warn:",
        Tone::Error => "error:",
    };
    let prefix = if is_tty() {
        match tone {
            Tone::Info => tag.cyan().bold().to_string(),
            Tone::Ok => tag.green().bold().to_string(),
            Tone::Warn => tag.yellow().bold().to_string(),
            Tone::Error => tag.red().bold().to_string(),
        }
    } else {
        tag.to_string()
    };
    match tone {
        Tone::Info | Tone::Ok => println!("{prefix} {msg}"),
        Tone::Warn | Tone::Error => eprintln!("{prefix} {msg}"),
    }
}

pub fn print_info(msg: &str) {
    emit(Tone::Info, msg);
}

pub fn print_warn(msg: &str) {
    emit(Tone::Warn, msg);
}

pub fn print_error(msg: &str) {
    emit(Tone::Error, msg);
}

pub fn print_success(msg: &str) {
    emit(Tone::Ok, msg);
}

/// Plain line for primary outputs (stage tables) that users may script against.
pub fn print_user(msg: &str) {
    println!("{msg}");
}

/// One-line summary of a standalone stage run.
pub fn print_report(stage: &str, report: &StageReport) {
    if report.failed > 0 {
        print_warn(&format!("{stage}: {report}"));
    } else {
        print_success(&format!("{stage}: {report}"));
    }
}
