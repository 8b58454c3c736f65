//! Record keys and key paths

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;
use crate::Result;

/// Primary or index key.
///
/// Numbers order before text, matching how SQLite compares the
/// typeless `key` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Key {
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Key::Integer(i))
                } else if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
                    Ok(Key::Real(f))
                } else {
                    Err(StorageError::Data(format!("Number {} is not a valid key", n)))
                }
            }
            Value::String(s) => Ok(Key::Text(s.clone())),
            other => Err(StorageError::Data(format!(
                "Value {} is not a valid key",
                other
            ))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Key::Integer(i) => Value::from(*i),
            Key::Real(f) => Value::from(*f),
            Key::Text(s) => Value::from(s.clone()),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Integer(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Integer(value.into())
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Integer(i) => write!(f, "{}", i),
            Key::Real(r) => write!(f, "{}", r),
            Key::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl ToSql for Key {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Key::Integer(i) => i.to_sql(),
            Key::Real(f) => f.to_sql(),
            Key::Text(s) => s.to_sql(),
        }
    }
}

impl FromSql for Key {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(Key::Integer(i)),
            ValueRef::Real(f) => Ok(Key::Real(f)),
            ValueRef::Text(_) => String::column_result(value).map(Key::Text),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Check a dotted key path such as `address.city`.
///
/// Key paths end up inside SQL expressions, so only identifier
/// segments are accepted.
pub fn validate_key_path(path: &str) -> Result<()> {
    let valid = !path.is_empty()
        && path.split('.').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                }
                _ => false,
            }
        });

    if valid {
        Ok(())
    } else {
        Err(StorageError::Data(format!("Invalid key path: {:?}", path)))
    }
}

/// Evaluate a key path against a record. `None` when any segment is missing.
pub fn extract(record: &Value, path: &str) -> Option<Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

/// Write a generated key into the record at `path`, creating
/// intermediate objects as needed.
pub fn inject(record: &mut Value, path: &str, key: &Key) -> Result<()> {
    let mut current = record;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        let object = current.as_object_mut().ok_or_else(|| {
            StorageError::Data(format!("Cannot inject key at {:?} into a non-object", path))
        })?;

        if segments.peek().is_none() {
            object.insert(segment.to_string(), key.to_json());
            return Ok(());
        }

        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_from_json() {
        assert_eq!(Key::from_json(&json!(7)).unwrap(), Key::Integer(7));
        assert_eq!(Key::from_json(&json!(1.5)).unwrap(), Key::Real(1.5));
        assert_eq!(Key::from_json(&json!("a")).unwrap(), Key::from("a"));
        assert!(Key::from_json(&json!(null)).is_err());
        assert!(Key::from_json(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_key_paths() {
        assert!(validate_key_path("id").is_ok());
        assert!(validate_key_path("address.city").is_ok());
        assert!(validate_key_path("").is_err());
        assert!(validate_key_path("a..b").is_err());
        assert!(validate_key_path("x'); DROP TABLE t; --").is_err());
    }

    #[test]
    fn test_extract_and_inject() {
        let mut record = json!({"name": "Benguet"});
        assert_eq!(extract(&record, "name"), Some(json!("Benguet")));
        assert_eq!(extract(&record, "meta.id"), None);

        inject(&mut record, "meta.id", &Key::Integer(3)).unwrap();
        assert_eq!(extract(&record, "meta.id"), Some(json!(3)));

        let mut scalar = json!(5);
        assert!(inject(&mut scalar, "id", &Key::Integer(1)).is_err());
    }
}
