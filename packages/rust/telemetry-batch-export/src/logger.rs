//! Logging utilities for telemetry-batch-export.
//!
//! The pipeline reports on itself through this small logger instead of a
//! `tracing` subscriber, so its own diagnostics can never be fed back into the
//! queue they describe.
//!
//! # Static Logger Example
//! ```
//! use telemetry_batch_export::logger::Logger;
//!
//! // Define a static logger for your module
//! static LOGGER: Logger = Logger::const_new("my_module");
//!
//! LOGGER.info("Starting module");
//! ```

use crate::constants::env_vars;
use std::env;
use std::fmt;
use std::sync::OnceLock;

/// Severity of a diagnostic message, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    None,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "none" | "off" => Some(LogLevel::None),
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::None => "none",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

// Global log level cache
static LOG_LEVEL: OnceLock<LogLevel> = OnceLock::new();

/// Resolve the log level once from the environment.
fn env_log_level() -> LogLevel {
    *LOG_LEVEL.get_or_init(|| {
        env::var(env_vars::LOG_LEVEL)
            .or_else(|_| env::var(env_vars::FALLBACK_LOG_LEVEL))
            .ok()
            .and_then(|value| LogLevel::parse(&value))
            .unwrap_or(LogLevel::Info)
    })
}

/// Logger with level filtering and consistent prefixing
#[derive(Clone)]
pub struct Logger {
    prefix: &'static str,
    log_level_fn: fn() -> LogLevel,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("prefix", &self.prefix)
            .field("level", &self.log_level())
            .finish()
    }
}

impl Logger {
    /// Create a new logger with the given prefix that can be used in const contexts
    pub const fn const_new(prefix: &'static str) -> Self {
        Self {
            prefix,
            log_level_fn: env_log_level,
        }
    }

    #[cfg(test)]
    const fn with_level_fn(prefix: &'static str, log_level_fn: fn() -> LogLevel) -> Self {
        Self {
            prefix,
            log_level_fn,
        }
    }

    fn log_level(&self) -> LogLevel {
        (self.log_level_fn)()
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level != LogLevel::None && level <= self.log_level()
    }

    fn format_message(&self, level: LogLevel, message: &str) -> String {
        format!("[{}] {}: {}", self.prefix, level, message)
    }

    /// Log a debug message
    pub fn debug(&self, message: impl AsRef<str>) {
        if self.should_log(LogLevel::Debug) {
            println!("{}", self.format_message(LogLevel::Debug, message.as_ref()));
        }
    }

    /// Log an info message
    pub fn info(&self, message: impl AsRef<str>) {
        if self.should_log(LogLevel::Info) {
            println!("{}", self.format_message(LogLevel::Info, message.as_ref()));
        }
    }

    /// Log a warning message
    pub fn warn(&self, message: impl AsRef<str>) {
        if self.should_log(LogLevel::Warn) {
            eprintln!("{}", self.format_message(LogLevel::Warn, message.as_ref()));
        }
    }

    /// Log an error message
    pub fn error(&self, message: impl AsRef<str>) {
        if self.should_log(LogLevel::Error) {
            eprintln!("{}", self.format_message(LogLevel::Error, message.as_ref()));
        }
    }
}
