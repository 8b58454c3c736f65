//! Upgrade-time schema handles

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog;
use crate::database::Connection;
use crate::key::Key;
use crate::records::{self, WriteMode};
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Dotted path of the primary key inside each record
    pub key_path: Option<String>,
    /// Generate integer keys when a record carries none
    pub auto_increment: bool,
}

impl CollectionOptions {
    pub fn key_path(path: impl Into<String>) -> Self {
        Self {
            key_path: Some(path.into()),
            auto_increment: false,
        }
    }

    pub fn auto_increment() -> Self {
        Self {
            key_path: None,
            auto_increment: true,
        }
    }

    pub fn with_auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub unique: bool,
}

impl IndexOptions {
    pub fn unique() -> Self {
        Self { unique: true }
    }
}

/// A collection as seen from inside an upgrade.
///
/// Writes here join the version change, so they commit or roll back
/// together with the schema.
#[derive(Debug, Clone)]
pub struct Collection {
    conn: Connection,
    name: String,
}

impl Collection {
    pub(crate) fn new(conn: Connection, name: String) -> Self {
        Self { conn, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_index(&self, name: &str, key_path: &str, options: IndexOptions) -> Result<()> {
        self.conn.require_upgrade("create index")?;
        self.conn.with_connection(|conn| {
            catalog::insert_index(conn, &self.name, name, key_path, options.unique)
        })?;

        tracing::debug!(
            collection = %self.name,
            index = %name,
            unique = options.unique,
            "Created index"
        );

        Ok(())
    }

    pub fn index_names(&self) -> Result<Vec<String>> {
        self.conn.with_connection(|conn| {
            Ok(catalog::list_indexes(conn, &self.name)?
                .into_iter()
                .map(|index| index.name)
                .collect())
        })
    }

    pub fn add(&self, record: Value) -> Result<Key> {
        self.conn.require_upgrade("write during upgrade")?;
        self.conn
            .with_connection(|conn| records::write(conn, &self.name, record, WriteMode::Add))
    }

    pub fn put(&self, record: Value) -> Result<Key> {
        self.conn.require_upgrade("write during upgrade")?;
        self.conn
            .with_connection(|conn| records::write(conn, &self.name, record, WriteMode::Put))
    }
}
