//! User-visible log sink

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Success,
    Info,
    Log,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Success => "success",
            LogLevel::Info => "info",
            LogLevel::Log => "log",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Receives leveled diagnostics meant for the user. Never used for control flow.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn success(&self, message: &str) {
        self.log(LogLevel::Success, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Forwards sink messages to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Success => tracing::info!(target: "stash::sink", kind = "success", "{}", message),
            LogLevel::Info => tracing::info!(target: "stash::sink", "{}", message),
            LogLevel::Log => tracing::debug!(target: "stash::sink", "{}", message),
            LogLevel::Error => tracing::error!(target: "stash::sink", "{}", message),
        }
    }
}
