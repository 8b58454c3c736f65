//! Catalog tables
//!
//! Version, collection and index bookkeeping kept next to the records.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::error::StorageError;
use crate::key::validate_key_path;
use crate::Result;

pub(crate) struct CollectionMeta {
    pub name: String,
    pub key_path: Option<String>,
    pub auto_increment: bool,
    pub current_key: i64,
}

pub(crate) struct IndexMeta {
    pub id: i64,
    pub name: String,
    pub key_path: String,
    pub unique: bool,
}

pub(crate) fn ensure_catalog(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS __stash_version (
            version INTEGER NOT NULL,
            upgraded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS __stash_collections (
            name TEXT PRIMARY KEY,
            key_path TEXT,
            auto_increment INTEGER NOT NULL DEFAULT 0,
            current_key INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS __stash_indexes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            name TEXT NOT NULL,
            key_path TEXT NOT NULL,
            is_unique INTEGER NOT NULL DEFAULT 0,
            UNIQUE (collection, name)
        );

        CREATE TABLE IF NOT EXISTS __stash_records (
            collection TEXT NOT NULL,
            record_key NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (collection, record_key)
        );
    "#,
    )?;
    Ok(())
}

pub(crate) fn get_version(conn: &Connection) -> Result<u32> {
    let version: Option<i64> = conn
        .query_row("SELECT version FROM __stash_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.map(|v| v as u32).unwrap_or(0))
}

pub(crate) fn set_version(conn: &Connection, version: u32) -> Result<()> {
    let upgraded_at = Utc::now().to_rfc3339();
    conn.execute("DELETE FROM __stash_version", [])?;
    conn.execute(
        "INSERT INTO __stash_version (version, upgraded_at) VALUES (?1, ?2)",
        rusqlite::params![version, upgraded_at],
    )?;
    Ok(())
}

pub(crate) fn collection_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM __stash_collections ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
}

pub(crate) fn find_collection(conn: &Connection, name: &str) -> Result<Option<CollectionMeta>> {
    let meta = conn
        .query_row(
            "SELECT name, key_path, auto_increment, current_key
             FROM __stash_collections WHERE name = ?1",
            [name],
            |row| {
                Ok(CollectionMeta {
                    name: row.get(0)?,
                    key_path: row.get(1)?,
                    auto_increment: row.get(2)?,
                    current_key: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(meta)
}

pub(crate) fn get_collection(conn: &Connection, name: &str) -> Result<CollectionMeta> {
    find_collection(conn, name)?
        .ok_or_else(|| StorageError::NotFound(format!("Collection '{}'", name)))
}

pub(crate) fn insert_collection(
    conn: &Connection,
    name: &str,
    key_path: Option<&str>,
    auto_increment: bool,
) -> Result<()> {
    if name.is_empty() {
        return Err(StorageError::Data(
            "Collection name cannot be empty".to_string(),
        ));
    }
    if let Some(path) = key_path {
        validate_key_path(path)?;
    }
    if find_collection(conn, name)?.is_some() {
        return Err(StorageError::Constraint(format!(
            "Collection '{}' already exists",
            name
        )));
    }

    conn.execute(
        "INSERT INTO __stash_collections (name, key_path, auto_increment) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, key_path, auto_increment],
    )?;
    Ok(())
}

pub(crate) fn bump_current_key(conn: &Connection, name: &str, key: i64) -> Result<()> {
    conn.execute(
        "UPDATE __stash_collections SET current_key = MAX(current_key, ?2) WHERE name = ?1",
        rusqlite::params![name, key],
    )?;
    Ok(())
}

pub(crate) fn list_indexes(conn: &Connection, collection: &str) -> Result<Vec<IndexMeta>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, key_path, is_unique FROM __stash_indexes
         WHERE collection = ?1 ORDER BY name",
    )?;
    let indexes = stmt
        .query_map([collection], |row| {
            Ok(IndexMeta {
                id: row.get(0)?,
                name: row.get(1)?,
                key_path: row.get(2)?,
                unique: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(indexes)
}

pub(crate) fn get_index(conn: &Connection, collection: &str, name: &str) -> Result<IndexMeta> {
    list_indexes(conn, collection)?
        .into_iter()
        .find(|index| index.name == name)
        .ok_or_else(|| {
            StorageError::NotFound(format!("Index '{}' on collection '{}'", name, collection))
        })
}

pub(crate) fn insert_index(
    conn: &Connection,
    collection: &str,
    name: &str,
    key_path: &str,
    unique: bool,
) -> Result<()> {
    validate_key_path(key_path)?;
    get_collection(conn, collection)?;
    if list_indexes(conn, collection)?
        .iter()
        .any(|index| index.name == name)
    {
        return Err(StorageError::Constraint(format!(
            "Index '{}' already exists on collection '{}'",
            name, collection
        )));
    }

    // A failed index build must not leave its catalog row behind
    conn.execute_batch("SAVEPOINT stash_create_index")?;
    let result = build_index(conn, collection, name, key_path, unique);
    match result {
        Ok(()) => conn.execute_batch("RELEASE stash_create_index")?,
        Err(_) => conn.execute_batch(
            "ROLLBACK TO stash_create_index; RELEASE stash_create_index",
        )?,
    }
    result
}

fn build_index(
    conn: &Connection,
    collection: &str,
    name: &str,
    key_path: &str,
    unique: bool,
) -> Result<()> {
    conn.execute(
        "INSERT INTO __stash_indexes (collection, name, key_path, is_unique) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![collection, name, key_path, unique],
    )?;
    let id = conn.last_insert_rowid();

    // Key paths are validated identifiers; the collection name is the only
    // free-form text and goes in as an escaped literal.
    let sql = format!(
        "CREATE {unique}INDEX {index} ON __stash_records (json_extract(value, '$.{path}'))
         WHERE collection = '{collection}'",
        unique = if unique { "UNIQUE " } else { "" },
        index = sql_index_name(id),
        path = key_path,
        collection = collection.replace('\'', "''"),
    );
    conn.execute_batch(&sql)
        .map_err(|e| StorageError::from_write(e, &format!("index '{}'", name)))?;
    Ok(())
}

pub(crate) fn remove_collection(conn: &Connection, name: &str) -> Result<()> {
    get_collection(conn, name)?;

    for index in list_indexes(conn, name)? {
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", sql_index_name(index.id)))?;
    }
    conn.execute("DELETE FROM __stash_indexes WHERE collection = ?1", [name])?;
    conn.execute("DELETE FROM __stash_records WHERE collection = ?1", [name])?;
    conn.execute("DELETE FROM __stash_collections WHERE name = ?1", [name])?;
    Ok(())
}

/// Replace internal index names in a constraint message with the
/// names the collection's indexes were created under
pub(crate) fn name_indexes(
    conn: &Connection,
    collection: &str,
    err: StorageError,
) -> StorageError {
    let StorageError::Constraint(message) = err else {
        return err;
    };

    let mut indexes = list_indexes(conn, collection).unwrap_or_default();
    // Longest ids first so `__stash_idx_1` never matches inside `__stash_idx_12`
    indexes.sort_by(|a, b| b.id.cmp(&a.id));

    let message = indexes.iter().fold(message, |message, index| {
        message.replace(&sql_index_name(index.id), &index.name)
    });
    StorageError::Constraint(message)
}

fn sql_index_name(id: i64) -> String {
    format!("__stash_idx_{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_catalog(&conn).unwrap();
        conn
    }

    #[test]
    fn test_version_defaults_to_zero() {
        let conn = catalog();
        assert_eq!(get_version(&conn).unwrap(), 0);

        set_version(&conn, 3).unwrap();
        set_version(&conn, 4).unwrap();
        assert_eq!(get_version(&conn).unwrap(), 4);
    }

    #[test]
    fn test_collection_lifecycle() {
        let conn = catalog();
        insert_collection(&conn, "people", Some("id"), false).unwrap();
        insert_index(&conn, "people", "barCode", "barCode", true).unwrap();

        let err = insert_collection(&conn, "people", None, true).unwrap_err();
        assert!(err.is_constraint());
        let err = insert_index(&conn, "people", "barCode", "barCode", false).unwrap_err();
        assert!(err.is_constraint());

        assert_eq!(collection_names(&conn).unwrap(), vec!["people".to_string()]);
        assert!(get_index(&conn, "people", "barCode").unwrap().unique);

        remove_collection(&conn, "people").unwrap();
        assert!(collection_names(&conn).unwrap().is_empty());
        assert!(list_indexes(&conn, "people").unwrap().is_empty());
    }

    #[test]
    fn test_quoted_collection_name() {
        let conn = catalog();
        insert_collection(&conn, "it's", Some("id"), false).unwrap();
        insert_index(&conn, "it's", "name", "name", false).unwrap();
        assert_eq!(list_indexes(&conn, "it's").unwrap().len(), 1);
    }
}
