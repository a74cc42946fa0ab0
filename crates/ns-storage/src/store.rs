use crate::value::{unwrap_value, wrap_tensor, Column, ColumnData, StoredValue, Table, NDARRAY_CLASS};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

/// Reserved key holding the serialized provenance record for the whole file.
pub const INFO_KEY: &str = "file_info";

pub const STORE_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("store info is malformed: {0}")]
    MalformedInfo(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Read,
    Write,
}

/// Keyed columnar object store over a single SQLite file.
///
/// Values are stored as JSON-encoded [`StoredValue`] payloads with an
/// optional JSON attribute blob per key. The adapter handles the array
/// wrap/unwrap convention and the binary-safe round trip for the reserved
/// whole-store info text.
pub struct MaterialStore {
    conn: Connection,
}

impl MaterialStore {
    /// Opens `path` in the requested mode. Read mode requires an existing
    /// file and never writes; write mode truncates any existing file, like
    /// the `'w'` mode of the stores it mimics.
    pub fn open(path: impl AsRef<Path>, mode: StoreMode) -> Result<Self, StorageError> {
        let path = path.as_ref();
        match mode {
            StoreMode::Read => {
                let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
                let store = Self { conn };
                let found = store.schema_version()?;
                if found > STORE_SCHEMA_VERSION {
                    return Err(StorageError::UnsupportedSchemaVersion {
                        found,
                        supported: STORE_SCHEMA_VERSION,
                    });
                }
                Ok(store)
            }
            StoreMode::Write => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let conn = Connection::open(path)?;
                let store = Self { conn };
                store.migrate()?;
                Ok(store)
            }
        }
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > STORE_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: STORE_SCHEMA_VERSION,
            });
        }
        if current < 1 {
            let sql = include_str!("../migrations/0001_objects.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }
        Ok(())
    }

    /// Reads the reserved info key, decoding the byte-sequence column back
    /// to UTF-8 text.
    pub fn get_info(&self) -> Result<String, StorageError> {
        let (payload, _) = self
            .read_row(INFO_KEY)?
            .ok_or_else(|| StorageError::KeyNotFound(INFO_KEY.to_string()))?;
        let value: StoredValue = serde_json::from_str(&payload)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        match value {
            StoredValue::Table(table) => table_to_text(&table),
            other => Err(StorageError::MalformedInfo(format!(
                "expected byte table, found {}",
                other.class_name()
            ))),
        }
    }

    /// Stores `info` under the reserved key, transcoded to a byte-sequence
    /// column so the payload stays within the store's columnar model.
    pub fn put_info(&self, info: &str) -> Result<(), StorageError> {
        let table = text_to_table(info);
        self.write_row(INFO_KEY, &StoredValue::Table(table), None)
    }

    /// Returns the stored value, undoing the array wrapping when the key is
    /// tagged with `{"class": "ndarray"}`.
    pub fn get(&self, key: &str) -> Result<StoredValue, StorageError> {
        let (value, attrs) = self.get_with_metadata(key)?;
        let is_ndarray = attrs
            .as_ref()
            .and_then(|attrs| attrs.get("class"))
            .and_then(Value::as_str)
            .map(|class| class == NDARRAY_CLASS)
            .unwrap_or(false);
        if is_ndarray {
            Ok(unwrap_value(value))
        } else {
            Ok(value)
        }
    }

    /// Returns the raw stored value (no unwrapping) together with the
    /// attribute metadata blob, if the key carries one.
    pub fn get_with_metadata(
        &self,
        key: &str,
    ) -> Result<(StoredValue, Option<Map<String, Value>>), StorageError> {
        let (payload, attrs) = self
            .read_row(key)?
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))?;
        let value: StoredValue = serde_json::from_str(&payload)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let attrs = attrs
            .map(|text| {
                serde_json::from_str::<Map<String, Value>>(&text)
                    .map_err(|err| StorageError::Serialization(err.to_string()))
            })
            .transpose()?;
        Ok((value, attrs))
    }

    /// Stores `value` under `key`. Raw arrays are wrapped into their
    /// columnar shape and tagged so [`MaterialStore::get`] can reverse the
    /// wrapping; everything else is stored as given, untagged.
    pub fn put(&self, key: &str, value: &StoredValue) -> Result<(), StorageError> {
        match value {
            StoredValue::Tensor(tensor) => {
                let wrapped = wrap_tensor(tensor);
                let mut attrs = Map::new();
                attrs.insert(
                    "class".to_string(),
                    Value::String(NDARRAY_CLASS.to_string()),
                );
                self.write_row(key, &wrapped, Some(&attrs))
            }
            other => self.write_row(key, other, None),
        }
    }

    /// `put`, then merges `metadata` into the key's attributes. Attributes
    /// already present (such as the array class tag) win on conflict; new
    /// fields augment rather than replace.
    pub fn put_with_metadata(
        &self,
        key: &str,
        value: &StoredValue,
        metadata: &Map<String, Value>,
    ) -> Result<(), StorageError> {
        self.put(key, value)?;
        let (_, existing) = self.get_with_metadata(key)?;
        let mut merged = metadata.clone();
        if let Some(existing) = existing {
            for (attr, attr_value) in existing {
                merged.insert(attr, attr_value);
            }
        }
        self.write_attrs(key, &merged)
    }

    /// User data keys, reserved key excluded.
    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut statement = self
            .conn
            .prepare("SELECT key FROM objects WHERE key != ?1 ORDER BY key")?;
        let rows = statement.query_map([INFO_KEY], |row| row.get(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }

    pub fn close(self) -> Result<(), StorageError> {
        self.conn
            .close()
            .map_err(|(_, err)| StorageError::Sqlite(err))
    }

    fn read_row(&self, key: &str) -> Result<Option<(String, Option<String>)>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT payload, attrs FROM objects WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?)
    }

    fn write_row(
        &self,
        key: &str,
        value: &StoredValue,
        attrs: Option<&Map<String, Value>>,
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_string(value)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let attrs = attrs
            .map(|attrs| {
                serde_json::to_string(attrs)
                    .map_err(|err| StorageError::Serialization(err.to_string()))
            })
            .transpose()?;
        self.conn.execute(
            "INSERT OR REPLACE INTO objects (key, payload, attrs) VALUES (?1, ?2, ?3)",
            params![key, payload, attrs],
        )?;
        Ok(())
    }

    fn write_attrs(&self, key: &str, attrs: &Map<String, Value>) -> Result<(), StorageError> {
        let attrs = serde_json::to_string(attrs)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.conn.execute(
            "UPDATE objects SET attrs = ?1 WHERE key = ?2",
            params![attrs, key],
        )?;
        Ok(())
    }
}

fn text_to_table(text: &str) -> Table {
    let bytes = text.bytes().map(i64::from).collect();
    Table {
        columns: vec![Column {
            name: "bytes".to_string(),
            data: ColumnData::Int(bytes),
        }],
    }
}

fn table_to_text(table: &Table) -> Result<String, StorageError> {
    let column = table
        .columns
        .first()
        .ok_or_else(|| StorageError::MalformedInfo("info table has no columns".to_string()))?;
    let bytes = match &column.data {
        ColumnData::Int(values) => values
            .iter()
            .map(|&value| {
                u8::try_from(value).map_err(|_| {
                    StorageError::MalformedInfo(format!("byte value out of range: {value}"))
                })
            })
            .collect::<Result<Vec<u8>, StorageError>>()?,
        other => {
            return Err(StorageError::MalformedInfo(format!(
                "info column is not a byte sequence ({} values)",
                other.len()
            )))
        }
    };
    String::from_utf8(bytes)
        .map_err(|err| StorageError::MalformedInfo(format!("invalid utf-8: {err}")))
}
