//! Storage engine
//!
//! Owns the registry of open databases and runs the open protocol:
//! an optional upgrade signal, then exactly one of success or error.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::catalog;
use crate::database::{Connection, Shared};
use crate::error::StorageError;
use crate::request::{OpenEvent, RawOpenRequest, VersionChange};
use crate::Result;

#[derive(Clone)]
pub struct Engine {
    /// Directory holding `<name>.sqlite` files; `None` keeps everything in memory
    root: Option<PathBuf>,
    databases: Arc<Mutex<HashMap<String, Arc<Shared>>>>,
}

impl Engine {
    /// Databases live as long as this engine and its clones
    pub fn in_memory() -> Self {
        Self {
            root: None,
            databases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// One SQLite file per database under `root`
    pub fn with_root<P: AsRef<Path>>(root: P) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;

        Ok(Self {
            root: Some(root.as_ref().to_path_buf()),
            databases: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Issue an open. Never blocks: the work is spawned onto the current
    /// tokio runtime and its outcome arrives as events on the returned request.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn open(&self, name: &str, version: u32) -> RawOpenRequest {
        let (events, receiver) = mpsc::unbounded_channel();
        let engine = self.clone();
        let db_name = name.to_string();

        tokio::spawn(async move {
            let event = match engine.run_open(&db_name, version, &events).await {
                Ok(connection) => OpenEvent::Success(connection),
                Err(e) => {
                    tracing::warn!(database = %db_name, version, error = %e, "Open failed");
                    OpenEvent::Error(e)
                }
            };
            let _ = events.send(event);
        });

        RawOpenRequest::new(name.to_string(), version, receiver)
    }

    /// Forget a database and remove its file. Missing databases are not an error.
    pub fn delete_database(&self, name: &str) -> Result<()> {
        self.databases.lock().remove(name);

        if let Some(path) = self.database_path(name)? {
            for suffix in ["", "-journal"] {
                let mut file = path.clone().into_os_string();
                file.push(suffix);
                match std::fs::remove_file(&file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        tracing::info!(database = %name, "Deleted database");
        Ok(())
    }

    async fn run_open(
        &self,
        name: &str,
        version: u32,
        events: &mpsc::UnboundedSender<OpenEvent>,
    ) -> Result<Connection> {
        if version == 0 {
            return Err(StorageError::InvalidVersion);
        }

        let shared = self.database(name)?;
        let _open_guard = shared.open_lock.lock().await;

        let stored = shared.with_connection(catalog::get_version)?;
        if version < stored {
            return Err(StorageError::Version {
                requested: version,
                stored,
            });
        }

        let connection = Connection::new(Arc::clone(&shared), version);
        if version == stored {
            tracing::debug!(database = %name, version, "Opened database");
            return Ok(connection);
        }

        tracing::info!(database = %name, from = stored, to = version, "Running upgrade");

        // Requests from older connections wait until the change commits or rolls back
        let _version_change = shared.version_change.write().await;
        shared.with_connection(|conn| Ok(conn.execute_batch("BEGIN IMMEDIATE")?))?;
        shared.begin_upgrade(&connection);

        let (reply, outcome) = oneshot::channel();
        let signal = OpenEvent::UpgradeNeeded {
            connection: connection.clone(),
            change: VersionChange {
                old_version: stored,
                new_version: version,
            },
            reply,
        };

        // Nobody listening, or nobody answering, means an empty upgrade
        let result = match events.send(signal) {
            Ok(()) => outcome.await.unwrap_or(Ok(())),
            Err(_) => Ok(()),
        };

        shared.end_upgrade();

        match result {
            Ok(()) => {
                let committed = shared.with_connection(|conn| {
                    catalog::set_version(conn, version)?;
                    conn.execute_batch("COMMIT")?;
                    Ok(())
                });
                if let Err(e) = committed {
                    rollback(&shared);
                    return Err(e);
                }

                tracing::info!(database = %name, version, "Upgrade committed");
                Ok(connection)
            }
            Err(e) => {
                rollback(&shared);
                tracing::warn!(database = %name, error = %e, "Upgrade rolled back");
                Err(StorageError::UpgradeAborted(Box::new(e)))
            }
        }
    }

    fn database(&self, name: &str) -> Result<Arc<Shared>> {
        let mut databases = self.databases.lock();
        if let Some(shared) = databases.get(name) {
            return Ok(Arc::clone(shared));
        }

        let shared = match self.database_path(name)? {
            Some(path) => Shared::open(name, path)?,
            None => Shared::open_in_memory(name)?,
        };
        let shared = Arc::new(shared);
        databases.insert(name.to_string(), Arc::clone(&shared));
        Ok(shared)
    }

    fn database_path(&self, name: &str) -> Result<Option<PathBuf>> {
        match &self.root {
            Some(root) => {
                validate_file_name(name)?;
                Ok(Some(root.join(format!("{}.sqlite", name))))
            }
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.root)
            .field("databases", &self.databases.lock().len())
            .finish()
    }
}

fn rollback(shared: &Shared) {
    if let Err(e) = shared.with_connection(|conn| Ok(conn.execute_batch("ROLLBACK")?)) {
        tracing::error!(error = %e, "Failed to roll back version change");
    }
}

fn validate_file_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(['/', '\\', '\0']);

    if invalid {
        Err(StorageError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use crate::schema::{CollectionOptions, IndexOptions};
    use crate::transaction::TransactionMode;
    use serde_json::json;

    async fn expect_success(request: &mut RawOpenRequest) -> Connection {
        match request.next_event().await {
            Some(OpenEvent::Success(conn)) => conn,
            other => panic!("expected success, got {:?}", other),
        }
    }

    /// Open at `version`, running `upgrade` if the engine asks for it
    async fn open_with<F>(engine: &Engine, name: &str, version: u32, upgrade: F) -> Result<Connection>
    where
        F: FnOnce(&Connection) -> Result<()>,
    {
        let mut request = engine.open(name, version);
        let mut upgrade = Some(upgrade);
        loop {
            match request.next_event().await {
                Some(OpenEvent::UpgradeNeeded { connection, reply, .. }) => {
                    let f = upgrade.take().unwrap();
                    let _ = reply.send(f(&connection));
                }
                Some(OpenEvent::Success(conn)) => return Ok(conn),
                Some(OpenEvent::Error(e)) => return Err(e),
                None => return Err(StorageError::Interrupted),
            }
        }
    }

    #[tokio::test]
    async fn test_new_database_requests_upgrade() {
        let engine = Engine::in_memory();
        let mut request = engine.open("shop", 1);

        match request.next_event().await {
            Some(OpenEvent::UpgradeNeeded {
                connection,
                change,
                reply,
            }) => {
                assert_eq!(change.old_version, 0);
                assert_eq!(change.new_version, 1);
                assert!(connection.is_upgrading());
                connection
                    .create_collection("items", CollectionOptions::key_path("id"))
                    .unwrap();
                reply.send(Ok(())).unwrap();
            }
            other => panic!("expected upgrade, got {:?}", other),
        }

        let conn = expect_success(&mut request).await;
        assert_eq!(conn.version(), 1);
        assert!(!conn.is_upgrading());
        assert!(request.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_same_version_skips_upgrade() {
        let engine = Engine::in_memory();
        open_with(&engine, "shop", 2, |_| Ok(())).await.unwrap();

        let mut request = engine.open("shop", 2);
        let conn = expect_success(&mut request).await;
        assert_eq!(conn.version(), 2);
    }

    #[tokio::test]
    async fn test_lower_version_is_rejected() {
        let engine = Engine::in_memory();
        open_with(&engine, "shop", 3, |_| Ok(())).await.unwrap();

        let err = open_with(&engine, "shop", 2, |_| Ok(())).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Version {
                requested: 2,
                stored: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_zero_version_is_rejected() {
        let engine = Engine::in_memory();
        let err = open_with(&engine, "shop", 0, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidVersion));
    }

    #[tokio::test]
    async fn test_failed_upgrade_rolls_back() {
        let engine = Engine::in_memory();
        let err = open_with(&engine, "shop", 1, |conn| {
            conn.create_collection("items", CollectionOptions::key_path("id"))?;
            Err(StorageError::Constraint("boom".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::UpgradeAborted(_)));
        assert!(err.is_constraint());

        // Nothing was committed: the next open upgrades from scratch
        let conn = open_with(&engine, "shop", 1, |conn| {
            assert!(conn.collection_names()?.is_empty());
            Ok(())
        })
        .await
        .unwrap();
        assert!(conn.collection_names().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_request_still_commits() {
        let engine = Engine::in_memory();
        drop(engine.open("shop", 1));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut request = engine.open("shop", 1);
        expect_success(&mut request).await;
    }

    #[tokio::test]
    async fn test_upgrade_writes_are_visible_after_commit() {
        let engine = Engine::in_memory();
        let conn = open_with(&engine, "shop", 1, |conn| {
            let items = conn.create_collection("items", CollectionOptions::key_path("id"))?;
            items.create_index("sku", "sku", IndexOptions::unique())?;
            items.add(json!({"id": 1, "sku": "A1"}))?;
            Ok(())
        })
        .await
        .unwrap();

        let store = conn
            .transaction(&["items"], TransactionMode::ReadOnly)
            .unwrap()
            .object_store("items")
            .unwrap();
        assert_eq!(store.get_all().await.unwrap(), vec![json!({"id": 1, "sku": "A1"})]);
        assert_eq!(
            store.index("sku").get("A1").await.unwrap(),
            Some(json!({"id": 1, "sku": "A1"}))
        );
        assert!(store.add(json!({"id": 2})).await.is_err());
    }

    #[tokio::test]
    async fn test_older_connection_waits_out_version_change() {
        let engine = Engine::in_memory();
        let older = open_with(&engine, "shop", 1, |conn| {
            conn.create_collection("items", CollectionOptions::key_path("id"))?;
            Ok(())
        })
        .await
        .unwrap();
        let store = older
            .transaction(&["items"], TransactionMode::ReadWrite)
            .unwrap()
            .object_store("items")
            .unwrap();

        let mut request = engine.open("shop", 2);
        let reply = match request.next_event().await {
            Some(OpenEvent::UpgradeNeeded { reply, .. }) => reply,
            other => panic!("expected upgrade, got {:?}", other),
        };

        // Uncommitted schema is not visible to the older connection
        assert!(matches!(
            older.collection_names(),
            Err(StorageError::InvalidState(_))
        ));

        let writer = store.clone();
        let mut put = tokio::spawn(async move { writer.put(json!({"id": 1, "sku": "A1"})).await });
        let waiting = tokio::time::timeout(std::time::Duration::from_millis(50), &mut put).await;
        assert!(waiting.is_err());

        reply.send(Err(StorageError::Constraint("boom".to_string()))).unwrap();
        assert!(matches!(
            request.next_event().await,
            Some(OpenEvent::Error(StorageError::UpgradeAborted(_)))
        ));

        assert_eq!(put.await.unwrap().unwrap(), Key::Integer(1));
        assert_eq!(store.get_all().await.unwrap(), vec![json!({"id": 1, "sku": "A1"})]);
    }

    #[tokio::test]
    async fn test_file_database_survives_engine() {
        let dir = tempfile::tempdir().unwrap();

        {
            let engine = Engine::with_root(dir.path()).unwrap();
            let conn = open_with(&engine, "people", 1, |conn| {
                conn.create_collection("people", CollectionOptions::key_path("id"))?;
                Ok(())
            })
            .await
            .unwrap();
            let store = conn
                .transaction(&["people"], TransactionMode::ReadWrite)
                .unwrap()
                .object_store("people")
                .unwrap();
            store.put(json!({"id": "p1", "name": "Benguet"})).await.unwrap();
        }

        let engine = Engine::with_root(dir.path()).unwrap();
        let mut request = engine.open("people", 1);
        let conn = expect_success(&mut request).await;
        let store = conn
            .transaction(&["people"], TransactionMode::ReadOnly)
            .unwrap()
            .object_store("people")
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        engine.delete_database("people").unwrap();
        assert!(!dir.path().join("people.sqlite").exists());
    }

    #[tokio::test]
    async fn test_delete_in_memory_database() {
        let engine = Engine::in_memory();
        open_with(&engine, "shop", 1, |_| Ok(())).await.unwrap();
        engine.delete_database("shop").unwrap();

        let mut request = engine.open("shop", 1);
        assert!(matches!(
            request.next_event().await,
            Some(OpenEvent::UpgradeNeeded { .. })
        ));
    }

    #[test]
    fn test_file_names() {
        assert!(validate_file_name("fake_data").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("../etc").is_err());
        assert!(validate_file_name("a/b").is_err());
    }
}
