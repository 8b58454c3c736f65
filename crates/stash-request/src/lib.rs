//! Stash Open Requests
//!
//! Sequences an asynchronous database open with the work that needs it.
//! Continuations registered before the connection exists are queued and
//! replayed in order; a one-time upgrade hook runs before any of them.

mod error;
mod handle;
mod sequencer;
mod sink;
mod state;

pub use error::{OpenError, TransactionError, UpgradeError};
pub use handle::{StorageHandle, TransactionScope};
pub use sequencer::{open, open_with_sink, ConnectionRequest, OpenRequest};
pub use sink::{LogLevel, LogSink, TracingSink};
pub use state::RequestState;

pub use stash_storage::{
    Collection, CollectionOptions, Connection, Engine, IndexOptions, Key, StorageError,
    TransactionMode, VersionChange,
};
