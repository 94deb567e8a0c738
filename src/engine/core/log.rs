use anyhow::{Context, Result, anyhow};
use chrono::Local;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

/// Local wall-clock timestamps, same format the debug log has always used
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "[{}]", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// ffbench.log in the current directory
pub fn default_log_path() -> Result<PathBuf> {
    Ok(std::env::current_dir()?.join("ffbench.log"))
}

fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install the global tracing subscriber.
///
/// With `log_file` the log is appended to that file (created if needed),
/// otherwise it goes to stderr. Calling this twice is an error.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>) -> Result<()> {
    let level = level_for(verbosity);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;

            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_timer(LocalTimer)
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow!(e))
        }
        None => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_timer(LocalTimer)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow!(e)),
    }
}
