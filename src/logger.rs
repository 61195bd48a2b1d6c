//! Logging backend
//!
//! Routes `log` records to a text sink installed by the firmware, usually a
//! UART writer. A record produced while the sink is already in use (the SDMMC
//! interrupt handler preempting a caller that is logging) is dropped instead
//! of blocking.
//!
//! Level tags are coloured with ANSI escapes when the `ansi-log` feature is
//! enabled.

use core::fmt::{self, Write};

use atomic_refcell::AtomicRefCell;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use spin::Once;

/// Destination for formatted log lines
pub type Sink = &'static mut (dyn Write + Send + Sync);

static SINK: AtomicRefCell<Option<Sink>> = AtomicRefCell::new(None);

/// Timestamp source for log lines
static TIMESTAMP: Once<fn() -> u64> = Once::new();

fn timestamp() -> u64 {
    TIMESTAMP.get().map_or(0, |now| now())
}

#[cfg(feature = "ansi-log")]
fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31mERROR\x1b[0m",
        Level::Warn => "\x1b[33mWARN\x1b[0m ",
        Level::Info => "\x1b[32mINFO\x1b[0m ",
        Level::Debug => "\x1b[34mDEBUG\x1b[0m",
        Level::Trace => "\x1b[35mTRACE\x1b[0m",
    }
}

#[cfg(not(feature = "ansi-log"))]
fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Format one log line
fn write_record(
    out: &mut dyn Write,
    ts: u64,
    level: Level,
    args: &fmt::Arguments<'_>,
) -> fmt::Result {
    writeln!(out, "[{:>10}] [{}] {}", ts, level_tag(level), args)
}

/// `log` backend writing to the installed [`Sink`]
struct SinkLogger;

impl log::Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let Ok(mut sink) = SINK.try_borrow_mut() else {
            return;
        };
        if let Some(out) = sink.as_deref_mut() {
            let _ = write_record(out, timestamp(), record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: SinkLogger = SinkLogger;

/// Install the logger
///
/// `now` provides the timestamp printed in front of every line.
pub fn init(sink: Sink, now: fn() -> u64) -> Result<(), SetLoggerError> {
    TIMESTAMP.call_once(|| now);
    if let Ok(mut slot) = SINK.try_borrow_mut() {
        *slot = Some(sink);
    }

    log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Debug))
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
