//! Console output for sink messages

use stash_core::{LogLevel, LogSink};

/// Prints sink messages to stdout, errors to stderr
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => eprintln!("[{}] {}", level, message),
            _ => println!("[{}] {}", level, message),
        }
    }
}
