//! Stash demo
//!
//! Recreates the `fake_data` database, builds and fills a `people`
//! collection during the upgrade, then prints every record through the
//! log sink.

mod console;
mod people;

use std::sync::Arc;

use stash_core::{Config, LogLevel, LogSink, RequestState, Stash, StorageHandle};
use tokio::task::LocalSet;

use console::ConsoleSink;

const DB_NAME: &str = "fake_data";
const PEOPLE: usize = 10;
/// Indentation step for nested output
const TAB: usize = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    stash_core::init_logging_with(&config.log_filter);

    let stash = Stash::new(config)?.with_sink(Arc::new(ConsoleSink));

    // Start from scratch so the upgrade runs every time
    stash.delete_database(DB_NAME)?;

    let records = people::generate(PEOPLE);
    let upgrade_sink = stash.sink();
    let read_sink = stash.sink();

    let state = LocalSet::new()
        .run_until(async move {
            stash
                .open(DB_NAME, 1)
                .then(move |db| async move { print_people(&db, read_sink.as_ref()).await })
                .upgrade(move |db, _| people::create_schema(db, records, upgrade_sink.as_ref()))
                .flush()
                .await
        })
        .await;

    if state != RequestState::Ready {
        anyhow::bail!("database '{}' could not be opened", DB_NAME);
    }

    tracing::info!(database = DB_NAME, "Demo finished");
    Ok(())
}

async fn print_people(db: &StorageHandle, sink: &dyn LogSink) {
    sink.success(&format!("Database Initialized: '{}'", db.name()));

    db.get_all_records(people::COLLECTION, |result| match result {
        Ok(records) => {
            sink.info(people::COLLECTION);
            for (i, item) in records.iter().enumerate() {
                sink.info(&format!("{:indent$}item {}", "", i, indent = TAB));

                let Some(fields) = item.as_object() else {
                    continue;
                };
                for (name, value) in fields {
                    sink.log(
                        LogLevel::Log,
                        &format!("{:indent$}{}: {}", "", name, value, indent = TAB * 2),
                    );
                }
            }
        }
        Err(e) => sink.error(&e.to_string()),
    })
    .await;
}
