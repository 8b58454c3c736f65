//! Stash Core
//!
//! Entry point for applications: configuration, logging setup and a
//! `Stash` that opens databases with a configured log sink.

mod config;
mod error;
mod stash;

pub use config::Config;
pub use error::CoreError;
pub use stash::Stash;

// Re-export core components
pub use stash_request::{
    open, open_with_sink, Collection, CollectionOptions, ConnectionRequest, Engine, IndexOptions,
    Key, LogLevel, LogSink, OpenError, OpenRequest, RequestState, StorageError, StorageHandle,
    TracingSink, TransactionError, TransactionMode, TransactionScope, UpgradeError,
    VersionChange,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    init_logging_with("info");
}

/// Initialize logging with `default_filter` unless `RUST_LOG` is set
pub fn init_logging_with(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt().with_env_filter(filter).with_target(true).init();
}
