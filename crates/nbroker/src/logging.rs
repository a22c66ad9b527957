//! Diagnostics go to stderr; stdout carries command output only.

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// `nbroker*` crates log at `level`; anything else is capped at warnings.
fn targets(level: LevelFilter) -> Targets {
    Targets::new()
        .with_default(level.min(LevelFilter::WARN))
        .with_target("nbroker", level)
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let verbose = matches!(level, LogLevel::Debug | LogLevel::Trace);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_thread_names(verbose)
        .with_target(verbose);
    let registry = tracing_subscriber::registry().with(targets(level.into()));

    // A second init (tests) keeps the first subscriber.
    let _ = match format {
        LogFormat::Text => registry.with(layer).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use super::*;

    #[test]
    fn broker_targets_follow_requested_level() {
        let filter = targets(LogLevel::Debug.into());
        assert!(filter.would_enable("nbroker_core::delivery", &Level::DEBUG));
        assert!(filter.would_enable("nbroker", &Level::INFO));
        assert!(!filter.would_enable("nbroker_sysv::queue", &Level::TRACE));
    }

    #[test]
    fn other_targets_are_capped_at_warn() {
        let filter = targets(LogLevel::Trace.into());
        assert!(filter.would_enable("ctrlc", &Level::WARN));
        assert!(!filter.would_enable("ctrlc", &Level::INFO));

        let quiet = targets(LogLevel::Error.into());
        assert!(!quiet.would_enable("ctrlc", &Level::WARN));
        assert!(quiet.would_enable("nbroker_core", &Level::ERROR));
    }
}
