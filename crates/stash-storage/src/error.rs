//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Transaction is read-only: {0}")]
    ReadOnly(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Version must be a positive integer")]
    InvalidVersion,

    #[error("Requested version {requested} is lower than stored version {stored}")]
    Version { requested: u32, stored: u32 },

    #[error("Data error: {0}")]
    Data(String),

    #[error("Invalid database name: {0}")]
    InvalidName(String),

    #[error("Upgrade aborted: {0}")]
    UpgradeAborted(Box<StorageError>),

    #[error("Request interrupted before completion")]
    Interrupted,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Name of the error in the engine's error vocabulary
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::NotFound(_) => "NotFoundError",
            StorageError::Constraint(_) => "ConstraintError",
            StorageError::ReadOnly(_) => "ReadOnlyError",
            StorageError::InvalidState(_) => "InvalidStateError",
            StorageError::InvalidVersion => "TypeError",
            StorageError::Version { .. } => "VersionError",
            StorageError::Data(_) => "DataError",
            StorageError::InvalidName(_) => "InvalidNameError",
            StorageError::UpgradeAborted(_) => "AbortError",
            StorageError::Interrupted => "AbortError",
            StorageError::Sqlite(_) | StorageError::Json(_) | StorageError::Io(_) => {
                "UnknownError"
            }
        }
    }

    pub fn is_constraint(&self) -> bool {
        match self {
            StorageError::Constraint(_) => true,
            StorageError::UpgradeAborted(inner) => inner.is_constraint(),
            _ => false,
        }
    }

    /// Map SQLite constraint failures onto `Constraint`
    pub(crate) fn from_write(err: rusqlite::Error, context: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Constraint(match msg {
                    Some(m) => format!("{}: {}", context, m),
                    None => context.to_string(),
                })
            }
            _ => StorageError::Sqlite(err),
        }
    }
}
