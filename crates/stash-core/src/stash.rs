//! Stash entry point

use std::sync::Arc;

use stash_request::{open_with_sink, Engine, LogSink, OpenRequest, TracingSink};

use crate::config::Config;
use crate::Result;

/// A configured engine plus the sink failed opens are reported to
#[derive(Clone)]
pub struct Stash {
    config: Config,
    engine: Engine,
    sink: Arc<dyn LogSink>,
}

impl Stash {
    pub fn new(config: Config) -> Result<Self> {
        let engine = if config.in_memory {
            Engine::in_memory()
        } else {
            // Ensure data directory exists
            std::fs::create_dir_all(&config.data_dir)?;
            Engine::with_root(&config.data_dir)?
        };

        tracing::debug!(
            data_dir = %config.data_dir.display(),
            in_memory = config.in_memory,
            "Stash initialized"
        );

        Ok(Self {
            config,
            engine,
            sink: Arc::new(TracingSink),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.sink)
    }

    /// Open `name` at `version`. Must be called inside a tokio `LocalSet`.
    pub fn open(&self, name: &str, version: u32) -> OpenRequest {
        open_with_sink(&self.engine, name, version, self.sink())
    }

    pub fn delete_database(&self, name: &str) -> Result<()> {
        Ok(self.engine.delete_database(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::error::CoreError;
    use stash_request::{CollectionOptions, RequestState, StorageError, TransactionMode};
    use std::cell::Cell;
    use std::path::PathBuf;
    use std::rc::Rc;
    use tokio::task::LocalSet;

    #[test]
    fn test_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("stash");

        let stash = Stash::new(Config::new(data_dir.clone())).unwrap();
        assert!(data_dir.is_dir());
        assert_eq!(stash.engine().root(), Some(data_dir.as_path()));
    }

    #[test]
    fn test_in_memory_writes_nothing() {
        let mut config = Config::in_memory();
        config.data_dir = PathBuf::from("/nonexistent/stash");

        let stash = Stash::new(config).unwrap();
        assert!(stash.engine().root().is_none());
    }

    #[test]
    fn test_clones_share_sink() {
        let stash = Stash::new(Config::in_memory()).unwrap();
        let copy = stash.clone();
        assert!(Arc::ptr_eq(&stash.sink(), &copy.sink()));
    }

    #[test]
    fn test_invalid_name_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let stash = Stash::new(Config::new(dir.path().to_path_buf())).unwrap();

        let err = stash.delete_database("../outside").unwrap_err();
        assert!(matches!(err, CoreError::Storage(StorageError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_reopen_after_delete() {
        LocalSet::new()
            .run_until(async {
                let dir = tempfile::tempdir().unwrap();
                let stash = Stash::new(Config::new(dir.path().to_path_buf())).unwrap();

                let state = stash
                    .open("fake_data", 1)
                    .upgrade(|db, _| {
                        db.create_collection("people", CollectionOptions::key_path("id"))?
                            .add(json!({"id": "p1"}))?;
                        Ok(())
                    })
                    .flush()
                    .await;
                assert_eq!(state, RequestState::Ready);

                let count = Rc::new(Cell::new(0));
                let seen = count.clone();
                stash
                    .open("fake_data", 1)
                    .then(move |db| async move {
                        let scope = db.transaction_for("people", TransactionMode::ReadOnly).unwrap();
                        seen.set(scope.count().await.unwrap());
                    })
                    .flush()
                    .await;
                assert_eq!(count.get(), 1);

                stash.delete_database("fake_data").unwrap();
                let upgraded = Rc::new(Cell::new(false));
                let flag = upgraded.clone();
                stash
                    .open("fake_data", 1)
                    .upgrade(move |_, change| {
                        flag.set(change.old_version == 0);
                        Ok(())
                    })
                    .flush()
                    .await;
                assert!(upgraded.get());
            })
            .await;
    }
}
