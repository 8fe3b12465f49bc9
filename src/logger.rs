use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::RwLock;

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::INFO.priority());
static LOG_SINK: RwLock<Option<&'static dyn LogSink>> = RwLock::new(None);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    FATAL,
    ERROR,
    WARN,
    INFO,
    DEBUG,
    TRACE,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::FATAL => "FATAL",
            LogLevel::ERROR => "ERROR",
            LogLevel::WARN => "WARN",
            LogLevel::INFO => "INFO",
            LogLevel::DEBUG => "DEBUG",
            LogLevel::TRACE => "TRACE",
        }
    }

    const fn priority(self) -> u8 {
        match self {
            LogLevel::FATAL => 1,
            LogLevel::ERROR => 2,
            LogLevel::WARN => 3,
            LogLevel::INFO => 4,
            LogLevel::DEBUG => 5,
            LogLevel::TRACE => 6,
        }
    }

    fn from_priority(value: u8) -> Self {
        match value {
            0 | 1 => LogLevel::FATAL,
            2 => LogLevel::ERROR,
            3 => LogLevel::WARN,
            4 => LogLevel::INFO,
            5 => LogLevel::DEBUG,
            _ => LogLevel::TRACE,
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("fatal") {
            Some(LogLevel::FATAL)
        } else if value.eq_ignore_ascii_case("error") {
            Some(LogLevel::ERROR)
        } else if value.eq_ignore_ascii_case("warn") || value.eq_ignore_ascii_case("warning") {
            Some(LogLevel::WARN)
        } else if value.eq_ignore_ascii_case("info") {
            Some(LogLevel::INFO)
        } else if value.eq_ignore_ascii_case("debug") {
            Some(LogLevel::DEBUG)
        } else if value.eq_ignore_ascii_case("trace") {
            Some(LogLevel::TRACE)
        } else {
            None
        }
    }
}

/// Destination for log records.
///
/// The kernel installs its serial console here; host tests install stderr.
pub trait LogSink: Sync {
    fn write_record(&self, level: LogLevel, args: fmt::Arguments<'_>);
}

/// Install the sink that receives every record at or above the max level.
pub fn set_sink(sink: &'static dyn LogSink) {
    *LOG_SINK.write() = Some(sink);
}

/// Remove the installed sink; records are discarded afterwards.
pub fn clear_sink() {
    *LOG_SINK.write() = None;
}

pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }

    // try_read: a record emitted while the sink is being replaced is dropped
    // rather than spinning with interrupts masked.
    if let Some(guard) = LOG_SINK.try_read() {
        if let Some(sink) = *guard {
            sink.write_record(level, args);
        }
    }
}

pub fn enabled(level: LogLevel) -> bool {
    level.priority() <= LOG_LEVEL.load(Ordering::Relaxed)
}

pub fn set_max_level(level: LogLevel) {
    LOG_LEVEL.store(level.priority(), Ordering::Relaxed);
}

pub fn max_level() -> LogLevel {
    LogLevel::from_priority(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn parse_level_directive(cmdline: &str) -> Option<LogLevel> {
    for token in cmdline.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            if key.eq_ignore_ascii_case("log") || key.eq_ignore_ascii_case("loglevel") {
                if let Some(level) = LogLevel::from_str(value) {
                    return Some(level);
                }
            }
        }
    }
    None
}

/// `[LEVEL]` padded to the widest level name, for sinks that print lines.
pub struct LevelDisplay(pub LogLevel);

impl fmt::Display for LevelDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<5}", self.0.as_str())
    }
}
