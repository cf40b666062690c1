//! log4rs setup shared by the standalone runner and the criterion bench.
//!
//! The console gets a short, level-highlighted line; the optional log file
//! gets timestamps, thread names and source locations, and also keeps the
//! backtrace of warnings, which is where aborted-case cleanup failures end up.

use log::{Level, LevelFilter, SetLoggerError};
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Config, Root},
    encode::{pattern::PatternEncoder, Encode},
    filter::threshold::ThresholdFilter,
};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::path::Path;
use thiserror::Error;

const CONSOLE_PATTERN: &str = "{h({l:<5})} {t} - {m}{n}";
const FILE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {l:<5} [{T}] {t} {f}:{L} - {m}{n}";

/// Pattern encoder that appends a backtrace to records at `trace_level` or
/// more severe. Capturing honours `RUST_BACKTRACE` and `RUST_LIB_BACKTRACE`;
/// when they disable it the record is written unchanged.
#[derive(Debug)]
struct TracingPatternEncoder {
    inner: PatternEncoder,
    trace_level: Level,
}

impl TracingPatternEncoder {
    fn new(pattern: &str, trace_level: Level) -> Self {
        Self {
            inner: PatternEncoder::new(pattern),
            trace_level,
        }
    }
}

impl Encode for TracingPatternEncoder {
    fn encode(
        &self,
        w: &mut dyn log4rs::encode::Write,
        record: &log::Record<'_>,
    ) -> anyhow::Result<()> {
        if record.level() > self.trace_level {
            return self.inner.encode(w, record);
        }
        let trace = Backtrace::capture();
        if trace.status() != BacktraceStatus::Captured {
            return self.inner.encode(w, record);
        }
        self.inner.encode(
            w,
            &record
                .to_builder()
                .args(format_args!("{}\n  backtrace:\n{trace}", record.args()))
                .build(),
        )
    }
}

/// Why logging could not be initialised.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("cannot open log file: {0}")]
    File(#[source] std::io::Error),

    #[error("invalid logging configuration: {0}")]
    Config(#[source] log4rs::config::runtime::ConfigErrors),

    #[error(transparent)]
    AlreadySet(#[from] SetLoggerError),
}

/// Install the global logger: stderr filtered at `log_level`, plus an
/// optional file that receives everything down to `Trace`.
pub fn initialize_logger(
    log_level: LevelFilter,
    file_path: Option<&Path>,
) -> Result<(), LoggerError> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(TracingPatternEncoder::new(
            CONSOLE_PATTERN,
            Level::Error,
        )))
        .build();

    let mut config_builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(log_level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");
    let mut root_level = log_level;

    if let Some(path) = file_path {
        let logfile = FileAppender::builder()
            .encoder(Box::new(TracingPatternEncoder::new(FILE_PATTERN, Level::Warn)))
            .build(path)
            .map_err(LoggerError::File)?;
        config_builder =
            config_builder.appender(Appender::builder().build("logfile", Box::new(logfile)));
        root = root.appender("logfile");
        root_level = LevelFilter::Trace;
    }

    let config = config_builder
        .build(root.build(root_level))
        .map_err(LoggerError::Config)?;
    log4rs::init_config(config)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log4rs::encode::writer::simple::SimpleWriter;

    fn encode(encoder: &TracingPatternEncoder, level: Level, message: &str) -> String {
        let mut out = SimpleWriter(Vec::new());
        encoder
            .encode(
                &mut out,
                &log::Record::builder()
                    .args(format_args!("{message}"))
                    .level(level)
                    .target("driver_bench::runner")
                    .file(Some("src/runner.rs"))
                    .line(Some(42))
                    .build(),
            )
            .unwrap();
        String::from_utf8(out.0).unwrap()
    }

    #[test]
    fn file_lines_carry_the_source_location() {
        let encoder = TracingPatternEncoder::new(FILE_PATTERN, Level::Warn);
        let line = encode(&encoder, Level::Info, "turso: primed this thread");
        assert!(line.contains("INFO "), "{line}");
        assert!(line.contains("driver_bench::runner src/runner.rs:42 - "), "{line}");
        assert!(line.ends_with("turso: primed this thread\n"), "{line}");
    }

    #[test]
    fn records_below_the_trace_level_are_untouched() {
        let encoder = TracingPatternEncoder::new(CONSOLE_PATTERN, Level::Error);
        let line = encode(&encoder, Level::Warn, "sqlite3InMemory1e1: while aborting");
        assert!(!line.contains("backtrace:"), "{line}");
        assert!(line.contains("driver_bench::runner - sqlite3InMemory1e1: while aborting"));
        assert_eq!(line.lines().count(), 1);
    }
}
