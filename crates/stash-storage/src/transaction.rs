//! Transactions, object stores and indexes
//!
//! Every request runs on tokio's blocking pool and is atomic on its own.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::Connection;
use crate::error::StorageError;
use crate::key::Key;
use crate::records::{self, WriteMode};
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl TransactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionMode::ReadOnly => "readonly",
            TransactionMode::ReadWrite => "readwrite",
        }
    }
}

impl std::fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "readonly" => Ok(TransactionMode::ReadOnly),
            "readwrite" => Ok(TransactionMode::ReadWrite),
            _ => Err(format!("Unknown transaction mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    conn: Connection,
    scope: Vec<String>,
    mode: TransactionMode,
}

impl Transaction {
    pub(crate) fn new(conn: Connection, scope: Vec<String>, mode: TransactionMode) -> Self {
        Self { conn, scope, mode }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    pub fn object_store(&self, name: &str) -> Result<ObjectStore> {
        if !self.scope.iter().any(|c| c == name) {
            return Err(StorageError::NotFound(format!(
                "Collection '{}' is not in this transaction's scope",
                name
            )));
        }

        Ok(ObjectStore {
            conn: self.conn.clone(),
            name: name.to_string(),
            mode: self.mode,
        })
    }
}

/// A collection bound to a transaction
#[derive(Debug, Clone)]
pub struct ObjectStore {
    conn: Connection,
    name: String,
    mode: TransactionMode,
}

impl ObjectStore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Insert a record; fails with a constraint error if its key exists
    pub async fn add(&self, record: Value) -> Result<Key> {
        self.write(record, WriteMode::Add).await
    }

    /// Insert or replace a record
    pub async fn put(&self, record: Value) -> Result<Key> {
        self.write(record, WriteMode::Put).await
    }

    pub async fn get(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        let name = self.name.clone();
        let key = key.into();
        self.conn
            .run(move |conn| records::get(conn, &name, &key))
            .await
    }

    pub async fn get_all(&self) -> Result<Vec<Value>> {
        let name = self.name.clone();
        self.conn.run(move |conn| records::get_all(conn, &name)).await
    }

    pub async fn count(&self) -> Result<u64> {
        let name = self.name.clone();
        self.conn.run(move |conn| records::count(conn, &name)).await
    }

    /// Delete by key. Returns whether a record was removed.
    pub async fn delete(&self, key: impl Into<Key>) -> Result<bool> {
        self.require_write()?;
        let name = self.name.clone();
        let key = key.into();
        self.conn
            .run(move |conn| records::delete(conn, &name, &key))
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.require_write()?;
        let name = self.name.clone();
        self.conn.run(move |conn| records::clear(conn, &name)).await
    }

    pub fn index(&self, name: &str) -> Index {
        Index {
            conn: self.conn.clone(),
            collection: self.name.clone(),
            name: name.to_string(),
        }
    }

    async fn write(&self, record: Value, mode: WriteMode) -> Result<Key> {
        self.require_write()?;
        let name = self.name.clone();
        self.conn
            .run(move |conn| records::write(conn, &name, record, mode))
            .await
    }

    fn require_write(&self) -> Result<()> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(StorageError::ReadOnly(self.name.clone())),
        }
    }
}

/// Secondary lookups on one index of a collection
#[derive(Debug, Clone)]
pub struct Index {
    conn: Connection,
    collection: String,
    name: String,
}

impl Index {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First record (in key order) whose indexed field equals `key`
    pub async fn get(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        Ok(self.get_all(key).await?.into_iter().next())
    }

    pub async fn get_all(&self, key: impl Into<Key>) -> Result<Vec<Value>> {
        let collection = self.collection.clone();
        let name = self.name.clone();
        let key = key.into();
        self.conn
            .run(move |conn| records::index_get_all(conn, &collection, &name, &key))
            .await
    }
}
