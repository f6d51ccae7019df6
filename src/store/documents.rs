//! Hierarchical document store.
//!
//! Documents live at slash-separated paths with an even number of segments
//! (`collection/doc[/collection/doc...]`). A batch of [`Mutation`]s commits
//! atomically. Merge writes only touch the nested fields they name.

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::constants::STORE_BATCH_LIMIT;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("document {path} holds invalid JSON: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("document {0} must be a JSON object")]
    NotAnObject(String),
    #[error("invalid document path '{0}'")]
    InvalidPath(String),
    #[error("batch of {0} mutations exceeds the limit of {1}")]
    BatchTooLarge(usize, usize),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Deep-merge into the existing document.
    Merge,
    /// Overwrite the whole document.
    Replace,
}

/// One pending write.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub path: String,
    pub data: Value,
    pub mode: WriteMode,
    /// Dotted field paths set to the commit time by the store.
    pub server_timestamps: Vec<String>,
}

impl Mutation {
    pub fn merge(path: impl Into<String>, data: Value) -> Self {
        Self {
            path: path.into(),
            data,
            mode: WriteMode::Merge,
            server_timestamps: Vec::new(),
        }
    }

    pub fn replace(path: impl Into<String>, data: Value) -> Self {
        Self {
            mode: WriteMode::Replace,
            ..Self::merge(path, data)
        }
    }

    pub fn with_server_timestamp(mut self, field: &str) -> Self {
        self.server_timestamps.push(field.to_string());
        self
    }
}

pub trait DocumentStore {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Direct child documents of a collection, ordered by path.
    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Applies every mutation or none of them.
    fn commit(&self, batch: &[Mutation]) -> Result<(), StoreError>;

    fn write(&self, mutation: Mutation) -> Result<(), StoreError> {
        self.commit(std::slice::from_ref(&mutation))
    }
}

/// Recursively merges `patch` into `target`. Objects merge key by key;
/// any other value replaces what was there.
pub fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let existing = target.entry(key.clone()).or_insert(Value::Null);
                if existing.is_object() && value.is_object() {
                    merge_json(existing, value);
                } else {
                    *existing = value.clone();
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn set_dotted(target: &mut Value, field: &str, value: Value) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(map) = target else {
        return;
    };
    match field.split_once('.') {
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            set_dotted(child, rest, value);
        }
        None => {
            map.insert(field.to_string(), value);
        }
    }
}

pub fn validate_path(path: &str) -> Result<(), StoreError> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() % 2 != 0 || segments.iter().any(|s| s.trim().is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// [`DocumentStore`] backed by a single SQLite table of JSON documents.
pub struct SqliteDocumentStore {
    conn: Connection,
}

impl SqliteDocumentStore {
    pub fn new(conn: Connection) -> Result<Self, StoreError> {
        create_table(&conn)?;
        Ok(Self { conn })
    }

    fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM documents WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|source| StoreError::Json {
                path: path.to_string(),
                source,
            })
        })
        .transpose()
    }
}

/// Initializes the documents table.
pub fn create_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents (
            path TEXT PRIMARY KEY NOT NULL,
            data TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
        [],
    )?;
    Ok(())
}

impl DocumentStore for SqliteDocumentStore {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        validate_path(path)?;
        self.read(path)
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let prefix = format!("{collection}/");
        let mut stmt = self
            .conn
            .prepare("SELECT path, data FROM documents WHERE substr(path, 1, ?1) = ?2 ORDER BY path")?;
        let mut rows = stmt.query(params![prefix.chars().count() as i64, prefix])?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            let path: String = row.get(0)?;
            match path.strip_prefix(prefix.as_str()) {
                Some(rest) if !rest.contains('/') => {}
                _ => continue,
            }
            let raw: String = row.get(1)?;
            let value = serde_json::from_str(&raw).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?;
            docs.push((path, value));
        }
        Ok(docs)
    }

    fn commit(&self, batch: &[Mutation]) -> Result<(), StoreError> {
        if batch.len() > STORE_BATCH_LIMIT {
            return Err(StoreError::BatchTooLarge(batch.len(), STORE_BATCH_LIMIT));
        }
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let transaction = self.conn.unchecked_transaction()?;
        {
            let mut upsert = transaction.prepare(
                "INSERT INTO documents (path, data, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(path) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            )?;
            for mutation in batch {
                validate_path(&mutation.path)?;
                if !mutation.data.is_object() {
                    return Err(StoreError::NotAnObject(mutation.path.clone()));
                }

                let mut document = match mutation.mode {
                    WriteMode::Replace => mutation.data.clone(),
                    WriteMode::Merge => {
                        let mut existing = self
                            .read(&mutation.path)?
                            .unwrap_or_else(|| Value::Object(Map::new()));
                        merge_json(&mut existing, &mutation.data);
                        existing
                    }
                };
                for field in &mutation.server_timestamps {
                    set_dotted(&mut document, field, Value::String(now.clone()));
                }

                let encoded = serde_json::to_string(&document).map_err(|source| StoreError::Json {
                    path: mutation.path.clone(),
                    source,
                })?;
                upsert.execute(params![mutation.path, encoded, now])?;
            }
        }
        // dropping an uncommitted transaction rolls the whole batch back
        transaction.commit()?;
        Ok(())
    }
}


#[cfg(test)]
pub(crate) mod fixtures {
    use std::ffi::c_int;

    use super::StoreError;

    /// A SQLite failure with the given primary result code.
    pub fn sqlite_error(code: c_int) -> StoreError {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }
}
