//! Storage handle
//!
//! What continuations and the upgrade hook receive: a connection with
//! shortcuts for single-collection transactions.

use serde_json::Value;
use stash_storage::{
    Collection, CollectionOptions, Connection, Key, ObjectStore, StorageError, TransactionMode,
};

use crate::error::{TransactionError, UpgradeError};

#[derive(Debug, Clone)]
pub struct StorageHandle {
    conn: Connection,
}

impl StorageHandle {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn name(&self) -> &str {
        self.conn.name()
    }

    pub fn version(&self) -> u32 {
        self.conn.version()
    }

    /// The engine connection underneath, for multi-collection transactions
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn collection_names(&self) -> Result<Vec<String>, StorageError> {
        self.conn.collection_names()
    }

    /// Open a fresh transaction scoped to exactly one collection.
    ///
    /// Nothing is pooled: each call starts a new transaction.
    pub fn transaction_for(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> Result<TransactionScope, TransactionError> {
        let store = self
            .conn
            .transaction(&[collection], mode)
            .and_then(|tx| tx.object_store(collection))
            .map_err(|e| TransactionError::new(collection, e))?;

        Ok(TransactionScope { store })
    }

    /// Every record of a collection, in key order, from a read-only transaction
    pub async fn get_all(&self, collection: &str) -> Result<Vec<Value>, TransactionError> {
        self.transaction_for(collection, TransactionMode::ReadOnly)?
            .get_all()
            .await
    }

    /// Read every record and hand the outcome to `on_result`
    pub async fn get_all_records<F>(&self, collection: &str, on_result: F)
    where
        F: FnOnce(Result<Vec<Value>, TransactionError>),
    {
        on_result(self.get_all(collection).await);
    }

    /// Create a collection. Only legal inside the upgrade hook.
    pub fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Collection, UpgradeError> {
        Ok(self.conn.create_collection(name, options)?)
    }

    /// Delete a collection. Only legal inside the upgrade hook.
    pub fn delete_collection(&self, name: &str) -> Result<(), UpgradeError> {
        Ok(self.conn.delete_collection(name)?)
    }
}

/// A single-collection transaction
#[derive(Debug, Clone)]
pub struct TransactionScope {
    store: ObjectStore,
}

impl TransactionScope {
    pub fn collection(&self) -> &str {
        self.store.name()
    }

    pub fn mode(&self) -> TransactionMode {
        self.store.mode()
    }

    /// The engine store, for requests not wrapped here
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub async fn add(&self, record: Value) -> Result<Key, TransactionError> {
        self.store.add(record).await.map_err(|e| self.error(e))
    }

    pub async fn put(&self, record: Value) -> Result<Key, TransactionError> {
        self.store.put(record).await.map_err(|e| self.error(e))
    }

    pub async fn get(&self, key: impl Into<Key>) -> Result<Option<Value>, TransactionError> {
        self.store.get(key).await.map_err(|e| self.error(e))
    }

    pub async fn get_all(&self) -> Result<Vec<Value>, TransactionError> {
        self.store.get_all().await.map_err(|e| self.error(e))
    }

    pub async fn count(&self) -> Result<u64, TransactionError> {
        self.store.count().await.map_err(|e| self.error(e))
    }

    pub async fn delete(&self, key: impl Into<Key>) -> Result<bool, TransactionError> {
        self.store.delete(key).await.map_err(|e| self.error(e))
    }

    pub async fn clear(&self) -> Result<(), TransactionError> {
        self.store.clear().await.map_err(|e| self.error(e))
    }

    /// Records whose `index` field equals `key`
    pub async fn find_by_index(
        &self,
        index: &str,
        key: impl Into<Key>,
    ) -> Result<Vec<Value>, TransactionError> {
        self.store
            .index(index)
            .get_all(key)
            .await
            .map_err(|e| self.error(e))
    }

    fn error(&self, source: StorageError) -> TransactionError {
        TransactionError::new(self.store.name(), source)
    }
}
