//! Database connection and operations

use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::catalog::{self, ensure_catalog};
use crate::error::StorageError;
use crate::schema::{Collection, CollectionOptions};
use crate::transaction::{Transaction, TransactionMode};
use crate::Result;

/// One physical database, shared by every `Connection` opened on it
pub(crate) struct Shared {
    name: String,
    conn: Mutex<rusqlite::Connection>,
    /// Id of the connection running a version change, 0 when none is
    upgrade_owner: AtomicU64,
    next_connection: AtomicU64,
    /// Serializes opens so only one version change runs at a time
    pub(crate) open_lock: tokio::sync::Mutex<()>,
    /// Held exclusively for the whole version change; requests hold it shared
    pub(crate) version_change: tokio::sync::RwLock<()>,
}

impl Shared {
    pub(crate) fn open<P: AsRef<Path>>(name: &str, path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;

        // Rollback journal: a connection still closing after its database was
        // deleted must not touch sidecar files of a recreated one
        let _: String =
            conn.pragma_update_and_check(None, "journal_mode", "DELETE", |row| row.get(0))?;

        ensure_catalog(&conn)?;
        Ok(Self::from_connection(name, conn))
    }

    pub(crate) fn open_in_memory(name: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        ensure_catalog(&conn)?;
        Ok(Self::from_connection(name, conn))
    }

    fn from_connection(name: &str, conn: rusqlite::Connection) -> Self {
        Self {
            name: name.to_string(),
            conn: Mutex::new(conn),
            upgrade_owner: AtomicU64::new(0),
            next_connection: AtomicU64::new(0),
            open_lock: tokio::sync::Mutex::new(()),
            version_change: tokio::sync::RwLock::new(()),
        }
    }

    pub(crate) fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub(crate) fn begin_upgrade(&self, connection: &Connection) {
        self.upgrade_owner.store(connection.id, Ordering::SeqCst);
    }

    pub(crate) fn end_upgrade(&self) {
        self.upgrade_owner.store(0, Ordering::SeqCst);
    }

    fn upgrade_owner(&self) -> Option<u64> {
        match self.upgrade_owner.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }
}

/// A live connection to a named, versioned database.
///
/// Cheap to clone; all clones talk to the same underlying database.
/// While another connection runs a version change, requests from this one
/// wait for it to finish and synchronous calls are refused.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    id: u64,
    version: u32,
}

impl Connection {
    pub(crate) fn new(shared: Arc<Shared>, version: u32) -> Self {
        let id = shared.next_connection.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            shared,
            id,
            version,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// True while this connection's upgrade step is running
    pub fn is_upgrading(&self) -> bool {
        self.shared.upgrade_owner() == Some(self.id)
    }

    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.with_connection(catalog::collection_names)
    }

    /// Create a collection. Only legal during an upgrade.
    pub fn create_collection(&self, name: &str, options: CollectionOptions) -> Result<Collection> {
        self.require_upgrade("create collection")?;
        self.with_connection(|conn| {
            catalog::insert_collection(
                conn,
                name,
                options.key_path.as_deref(),
                options.auto_increment,
            )
        })?;

        tracing::info!(database = %self.name(), collection = %name, "Created collection");

        Ok(Collection::new(self.clone(), name.to_string()))
    }

    /// Delete a collection with its records and indexes. Only legal during an upgrade.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        self.require_upgrade("delete collection")?;
        self.with_connection(|conn| catalog::remove_collection(conn, name))?;

        tracing::info!(database = %self.name(), collection = %name, "Deleted collection");

        Ok(())
    }

    /// Start a transaction over the given collections
    pub fn transaction(&self, collections: &[&str], mode: TransactionMode) -> Result<Transaction> {
        if self.is_upgrading() {
            return Err(StorageError::InvalidState(
                "Cannot start a transaction while a version change is running".to_string(),
            ));
        }
        if collections.is_empty() {
            return Err(StorageError::InvalidState(
                "Transaction scope cannot be empty".to_string(),
            ));
        }

        self.with_connection(|conn| {
            for name in collections {
                catalog::get_collection(conn, name)?;
            }
            Ok(())
        })?;

        Ok(Transaction::new(
            self.clone(),
            collections.iter().map(|c| c.to_string()).collect(),
            mode,
        ))
    }

    /// Synchronous access. Refused while another connection's version
    /// change is running, since its work is not committed yet.
    pub(crate) fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T>,
    {
        match self.shared.upgrade_owner() {
            Some(owner) if owner != self.id => Err(StorageError::InvalidState(format!(
                "A version change is running on '{}'",
                self.name()
            ))),
            _ => self.shared.with_connection(f),
        }
    }

    /// Run a request on the blocking pool and wait for its outcome.
    ///
    /// Waits for a running version change to commit or roll back first.
    pub(crate) async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_upgrading() {
            return Err(StorageError::InvalidState(
                "Requests cannot run inside their own version change".to_string(),
            ));
        }

        let _version = self.shared.version_change.read().await;
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.with_connection(f))
            .await
            .map_err(|_| StorageError::Interrupted)?
    }

    pub(crate) fn require_upgrade(&self, operation: &str) -> Result<()> {
        if self.is_upgrading() {
            Ok(())
        } else {
            Err(StorageError::InvalidState(format!(
                "Cannot {} outside of an upgrade",
                operation
            )))
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.shared.name)
            .field("id", &self.id)
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        let shared = Arc::new(Shared::open_in_memory("test").unwrap());
        Connection::new(shared, 1)
    }

    #[test]
    fn test_schema_changes_require_upgrade() {
        let conn = connection();
        let err = conn
            .create_collection("people", CollectionOptions::key_path("id"))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidState(_)));

        conn.shared.begin_upgrade(&conn);
        conn.create_collection("people", CollectionOptions::key_path("id"))
            .unwrap();
        assert!(conn.transaction(&["people"], TransactionMode::ReadOnly).is_err());
        conn.shared.end_upgrade();

        assert_eq!(conn.collection_names().unwrap(), vec!["people".to_string()]);
        assert!(conn.delete_collection("people").is_err());
    }

    #[test]
    fn test_transaction_scope_must_exist() {
        let conn = connection();
        let err = conn
            .transaction(&["missing"], TransactionMode::ReadWrite)
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(conn.transaction(&[], TransactionMode::ReadWrite).is_err());
    }

    #[test]
    fn test_other_connections_refused_during_upgrade() {
        let older = connection();
        let upgrading = Connection::new(Arc::clone(&older.shared), 2);

        older.shared.begin_upgrade(&upgrading);
        assert!(upgrading.is_upgrading());
        assert!(!older.is_upgrading());
        let err = older.collection_names().unwrap_err();
        assert!(matches!(err, StorageError::InvalidState(_)));
        assert!(older
            .create_collection("people", CollectionOptions::key_path("id"))
            .is_err());

        upgrading
            .create_collection("people", CollectionOptions::key_path("id"))
            .unwrap();
        older.shared.end_upgrade();

        assert_eq!(older.collection_names().unwrap(), vec!["people".to_string()]);
    }
}
