//! Record reads and writes
//!
//! Plain functions over a SQLite connection, shared by the synchronous
//! upgrade-time `Collection` and the asynchronous `ObjectStore`.

use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use crate::catalog::{self, CollectionMeta};
use crate::error::StorageError;
use crate::key::{self, Key};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Fail when the key already exists
    Add,
    /// Insert or overwrite
    Put,
}

/// Write one record. The key generator and the record move together:
/// a rejected write leaves both untouched.
pub(crate) fn write(
    conn: &Connection,
    collection: &str,
    record: Value,
    mode: WriteMode,
) -> Result<Key> {
    conn.execute_batch("SAVEPOINT stash_write")?;
    let result = write_record(conn, collection, record, mode);
    match result {
        Ok(_) => conn.execute_batch("RELEASE stash_write")?,
        Err(_) => conn.execute_batch("ROLLBACK TO stash_write; RELEASE stash_write")?,
    }
    result
}

fn write_record(
    conn: &Connection,
    collection: &str,
    mut record: Value,
    mode: WriteMode,
) -> Result<Key> {
    let meta = catalog::get_collection(conn, collection)?;
    let key = resolve_key(&meta, &mut record)?;

    if meta.auto_increment {
        if let Key::Integer(i) = key {
            catalog::bump_current_key(conn, &meta.name, i)?;
        }
    }

    let value = serde_json::to_string(&record)?;
    let sql = match mode {
        WriteMode::Add => {
            "INSERT INTO __stash_records (collection, record_key, value) VALUES (?1, ?2, ?3)"
        }
        // Upsert on the primary key only, so unique index conflicts with
        // other records still surface as errors.
        WriteMode::Put => {
            "INSERT INTO __stash_records (collection, record_key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (collection, record_key) DO UPDATE SET value = excluded.value"
        }
    };

    conn.execute(sql, rusqlite::params![collection, key, value])
        .map_err(|e| {
            let context = format!("key {} in '{}'", key, collection);
            catalog::name_indexes(conn, collection, StorageError::from_write(e, &context))
        })?;

    tracing::trace!(collection = %collection, key = %key, "Record written");

    Ok(key)
}

fn resolve_key(meta: &CollectionMeta, record: &mut Value) -> Result<Key> {
    match (&meta.key_path, meta.auto_increment) {
        (Some(path), auto_increment) => match key::extract(record, path) {
            Some(value) => Key::from_json(&value),
            None if auto_increment => {
                let key = Key::Integer(meta.current_key + 1);
                key::inject(record, path, &key)?;
                Ok(key)
            }
            None => Err(StorageError::Data(format!(
                "Record has no value at key path '{}'",
                path
            ))),
        },
        (None, true) => Ok(Key::Integer(meta.current_key + 1)),
        (None, false) => Err(StorageError::Data(format!(
            "Collection '{}' has neither a key path nor a key generator",
            meta.name
        ))),
    }
}

pub(crate) fn get(conn: &Connection, collection: &str, key: &Key) -> Result<Option<Value>> {
    catalog::get_collection(conn, collection)?;

    let text: Option<String> = conn
        .query_row(
            "SELECT value FROM __stash_records WHERE collection = ?1 AND record_key = ?2",
            rusqlite::params![collection, key],
            |row| row.get(0),
        )
        .optional()?;

    text.map(|t| serde_json::from_str(&t).map_err(StorageError::from))
        .transpose()
}

pub(crate) fn get_all(conn: &Connection, collection: &str) -> Result<Vec<Value>> {
    catalog::get_collection(conn, collection)?;

    let mut stmt = conn.prepare(
        "SELECT value FROM __stash_records WHERE collection = ?1 ORDER BY record_key",
    )?;
    let rows = stmt
        .query_map([collection], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    decode_all(rows)
}

pub(crate) fn count(conn: &Connection, collection: &str) -> Result<u64> {
    catalog::get_collection(conn, collection)?;

    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM __stash_records WHERE collection = ?1",
        [collection],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

pub(crate) fn delete(conn: &Connection, collection: &str, key: &Key) -> Result<bool> {
    catalog::get_collection(conn, collection)?;

    let removed = conn.execute(
        "DELETE FROM __stash_records WHERE collection = ?1 AND record_key = ?2",
        rusqlite::params![collection, key],
    )?;
    Ok(removed > 0)
}

pub(crate) fn clear(conn: &Connection, collection: &str) -> Result<()> {
    catalog::get_collection(conn, collection)?;

    conn.execute("DELETE FROM __stash_records WHERE collection = ?1", [collection])?;
    Ok(())
}

pub(crate) fn index_get_all(
    conn: &Connection,
    collection: &str,
    index: &str,
    key: &Key,
) -> Result<Vec<Value>> {
    let meta = catalog::get_index(conn, collection, index)?;
    let path = format!("$.{}", meta.key_path);

    let mut stmt = conn.prepare(
        "SELECT value FROM __stash_records
         WHERE collection = ?1 AND json_extract(value, ?2) = ?3
         ORDER BY record_key",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![collection, path, key], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    decode_all(rows)
}

fn decode_all(rows: Vec<String>) -> Result<Vec<Value>> {
    rows.iter()
        .map(|text| serde_json::from_str(text).map_err(StorageError::from))
        .collect()
}
