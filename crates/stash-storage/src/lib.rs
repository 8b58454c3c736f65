//! Stash Storage Engine
//!
//! Versioned, named object-store databases on top of SQLite.
//! Opening is event based: callers receive an upgrade signal (at most once)
//! followed by either success or an error.

mod catalog;
mod database;
mod engine;
mod error;
mod key;
mod records;
mod request;
mod schema;
mod transaction;

pub use database::Connection;
pub use engine::Engine;
pub use error::StorageError;
pub use key::Key;
pub use request::{OpenEvent, RawOpenRequest, UpgradeReply, VersionChange};
pub use schema::{Collection, CollectionOptions, IndexOptions};
pub use transaction::{Index, ObjectStore, Transaction, TransactionMode};

pub type Result<T> = std::result::Result<T, StorageError>;
