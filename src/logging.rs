use std::sync::{Arc, Mutex};

use log::{Level, LevelFilter};
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use serde::Serialize;

const CONSOLE_APPENDER: &str = "stderr";
const CONSOLE_PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S)}] {l:<5} {m}{n}";

/// Severity of a conversion log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Debug => Level::Debug,
            LogLevel::Info => Level::Info,
            LogLevel::Warn => Level::Warn,
            LogLevel::Error => Level::Error,
        }
    }
}

/// One line of the per-conversion log handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: jiff::Timestamp,
}

/// Collects every message of a single conversion while forwarding it to the
/// `log` facade.
///
/// Cloning shares the underlying buffer, so stage helpers and texture workers
/// can each hold a handle.
#[derive(Debug, Clone, Default)]
pub struct ConversionLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl ConversionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a message to the facade and record it.
    pub fn send(&self, level: LogLevel, message: &str) {
        log::log!(target: "vrm2pmx", Level::from(level), "{message}");

        match self.entries.lock() {
            Ok(mut entries) => entries.push(LogEntry {
                level,
                message: message.to_string(),
                timestamp: jiff::Timestamp::now(),
            }),
            Err(_) => eprintln!("[{}] {}", level.as_str().to_uppercase(), message),
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Number of recorded entries at the given level.
    pub fn count(&self, level: LogLevel) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.iter().filter(|entry| entry.level == level).count())
            .unwrap_or(0)
    }

    /// Render the log as plain text, one entry per line.
    pub fn render(&self) -> String {
        self.entries()
            .iter()
            .map(|entry| {
                format!(
                    "[{}] {:<5} {}",
                    entry.timestamp,
                    entry.level.as_str().to_uppercase(),
                    entry.message
                )
            })
            .collect::<Vec<String>>()
            .join("\n")
    }
}

/// Convenience macros for logging
#[macro_export]
macro_rules! log_debug {
    ($log:expr, $($arg:tt)*) => {
        $log.send($crate::logging::LogLevel::Debug, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($log:expr, $($arg:tt)*) => {
        $log.send($crate::logging::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($log:expr, $($arg:tt)*) => {
        $log.send($crate::logging::LogLevel::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($log:expr, $($arg:tt)*) => {
        $log.send($crate::logging::LogLevel::Error, &format!($($arg)*))
    };
}

// ─── Console logger ───────────────────────────────────────────────────────────

/// log4rs configuration for the CLI: a single stderr appender at `level`.
pub fn console_config(level: LevelFilter) -> anyhow::Result<Config> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build(CONSOLE_APPENDER, Box::new(stderr)))
        .build(Root::builder().appender(CONSOLE_APPENDER).build(level))?;
    Ok(config)
}

/// Install the stderr logger used by the CLI.
pub fn init_logging(level: LevelFilter) {
    let installed = console_config(level)
        .and_then(|config| log4rs::init_config(config).map_err(anyhow::Error::from));
    if let Err(error) = installed {
        eprintln!("Warning: logging not initialized: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_messages_when_sent_then_entries_keep_order_and_level() {
        let log = ConversionLog::new();

        crate::log_info!(log, "stage {} done", "read");
        crate::log_warn!(log, "vertex {} fell back", 7);

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[0].message, "stage read done");
        assert_eq!(entries[1].level, LogLevel::Warn);
        assert_eq!(log.count(LogLevel::Warn), 1);
    }

    #[test]
    fn given_cloned_log_when_sending_then_buffer_is_shared() {
        let log = ConversionLog::new();
        let handle = log.clone();

        crate::log_debug!(handle, "from worker");

        assert_eq!(log.entries().len(), 1);
        assert!(log.render().contains("from worker"));
    }

    #[test]
    fn given_verbose_level_when_building_console_config_then_root_writes_to_stderr_appender() {
        let config = console_config(LevelFilter::Debug).expect("config");

        assert_eq!(config.root().level(), LevelFilter::Debug);
        assert_eq!(config.root().appenders(), &[CONSOLE_APPENDER.to_string()]);
        let names: Vec<&str> = config.appenders().iter().map(Appender::name).collect();
        assert_eq!(names, vec![CONSOLE_APPENDER]);
    }
}
