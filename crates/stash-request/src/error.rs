//! Request error types

use stash_storage::StorageError;
use thiserror::Error;

/// The open itself failed. The request is `Failed` and no continuation runs.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("Open of '{name}' v{version} rejected: {source}")]
    Rejected {
        name: String,
        version: u32,
        #[source]
        source: StorageError,
    },

    #[error("Upgrade of '{name}' to v{version} aborted: {source}")]
    Upgrade {
        name: String,
        version: u32,
        #[source]
        source: StorageError,
    },

    #[error("Open of '{name}' v{version} ended without a result")]
    Interrupted { name: String, version: u32 },
}

impl OpenError {
    pub(crate) fn from_engine(name: &str, version: u32, err: StorageError) -> Self {
        match err {
            StorageError::UpgradeAborted(inner) => OpenError::Upgrade {
                name: name.to_string(),
                version,
                source: *inner,
            },
            other => OpenError::Rejected {
                name: name.to_string(),
                version,
                source: other,
            },
        }
    }
}

/// A request issued through a `StorageHandle` failed.
///
/// Local to that request: the open request and other transactions are unaffected.
#[derive(Error, Debug)]
#[error("Transaction on '{collection}' failed: {source}")]
pub struct TransactionError {
    pub collection: String,
    #[source]
    pub source: StorageError,
}

impl TransactionError {
    pub(crate) fn new(collection: &str, source: StorageError) -> Self {
        Self {
            collection: collection.to_string(),
            source,
        }
    }

    /// Duplicate primary key or unique index value
    pub fn is_constraint(&self) -> bool {
        self.source.is_constraint()
    }
}

/// A schema change made during an upgrade failed.
///
/// Returning it from the upgrade hook aborts the whole open.
#[derive(Error, Debug)]
#[error("Upgrade step failed: {0}")]
pub struct UpgradeError(#[from] pub StorageError);

impl UpgradeError {
    pub fn into_inner(self) -> StorageError {
        self.0
    }
}
