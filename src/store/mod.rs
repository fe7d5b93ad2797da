//! SQLite-backed experiment store.
//!
//! Local-first persistence using SQLite with WAL mode. Records are plain
//! serde structs implementing [`Entity`]; the store keeps their foreign keys
//! in indexed columns and the remaining fields as a JSON body.
//!
//! # Example
//!
//! ```ignore
//! use ensayo::store::Store;
//!
//! let store = Store::open("./ensayo.db")?;
//! let queue: Queue = store.get(queue_id)?;
//! let jobs: Vec<Job> = store.find(&[("queue_id", Some(queue.id))])?;
//! ```

pub(crate) mod schema;

use crate::error::{Error, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// A persisted record.
pub trait Entity: Serialize + DeserializeOwned {
    /// Backing table name.
    const TABLE: &'static str;
    /// Human-readable name used in `NotFound` errors.
    const NAME: &'static str;

    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    /// Indexed foreign-key columns written beside the body.
    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        Vec::new()
    }
}

/// Equality filter on an indexed column; `None` matches SQL `NULL`.
pub type Filter<'a> = (&'a str, Option<i64>);

/// Handle to the experiment database.
#[derive(Debug)]
pub struct Store {
    path: String,
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create a store at the given path (`:memory:` for in-memory).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let conn = if path_str == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path.as_ref())?
        };
        schema::init_schema(&conn)?;
        Ok(Self { path: path_str, conn: Mutex::new(conn) })
    }

    /// Open an in-memory store
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Get the database path
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to acquire store lock: {e}")))
    }

    pub fn insert<T: Entity>(&self, entity: &mut T) -> Result<i64> {
        insert_row(&*self.lock_conn()?, entity)
    }

    /// Rewrite the body (and keys) of an existing record.
    pub fn update<T: Entity>(&self, entity: &T) -> Result<()> {
        update_row(&*self.lock_conn()?, entity)
    }

    pub fn get<T: Entity>(&self, id: i64) -> Result<T> {
        get_row(&*self.lock_conn()?, id)
    }

    /// Records matching every filter, in insertion order.
    pub fn find<T: Entity>(&self, filters: &[Filter<'_>]) -> Result<Vec<T>> {
        find_rows(&*self.lock_conn()?, filters)
    }

    /// First matching record, if any.
    pub fn find_one<T: Entity>(&self, filters: &[Filter<'_>]) -> Result<Option<T>> {
        Ok(self.find(filters)?.into_iter().next())
    }

    /// Most recently inserted matching record.
    pub fn latest<T: Entity>(&self, filters: &[Filter<'_>]) -> Result<Option<T>> {
        Ok(self.find(filters)?.pop())
    }

    pub fn all<T: Entity>(&self) -> Result<Vec<T>> {
        self.find(&[])
    }

    pub fn count<T: Entity>(&self, filters: &[Filter<'_>]) -> Result<usize> {
        let conn = self.lock_conn()?;
        let (clause, values) = where_clause(filters);
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}{clause}", T::TABLE),
            params_from_iter(values),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn delete<T: Entity>(&self, id: i64) -> Result<()> {
        delete_row::<T>(&*self.lock_conn()?, id)
    }

    /// Run `f` inside one transaction; any error rolls every write back.
    pub fn atomically<R>(&self, f: impl FnOnce(&Tx<'_>) -> Result<R>) -> Result<R> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let out = f(&Tx { conn: &tx })?;
        tx.commit()?;
        Ok(out)
    }

    /// Store bytes content-addressed by SHA-256; returns the hex digest.
    pub fn put_artifact(&self, data: &[u8]) -> Result<String> {
        let sha256 = format!("{:x}", Sha256::digest(data));
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO artifacts (sha256, data, size_bytes) VALUES (?1, ?2, ?3)",
            params![sha256, data, data.len() as i64],
        )?;
        Ok(sha256)
    }

    /// Get artifact data by SHA-256 hash
    pub fn artifact(&self, sha256: &str) -> Result<Vec<u8>> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT data FROM artifacts WHERE sha256 = ?1", [sha256], |row| row.get(0))
            .optional()?
            .ok_or_else(|| Error::not_found("Artifact", sha256))
    }
}

/// Writes scoped to an open transaction.
pub struct Tx<'a> {
    conn: &'a Connection,
}

impl Tx<'_> {
    pub fn insert<T: Entity>(&self, entity: &mut T) -> Result<i64> {
        insert_row(self.conn, entity)
    }

    pub fn update<T: Entity>(&self, entity: &T) -> Result<()> {
        update_row(self.conn, entity)
    }

    pub fn find<T: Entity>(&self, filters: &[Filter<'_>]) -> Result<Vec<T>> {
        find_rows(self.conn, filters)
    }
}

/// `true` when a write failed on a UNIQUE or foreign-key constraint.
pub fn is_constraint_violation(error: &Error) -> bool {
    matches!(
        error,
        Error::Store(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation
    )
}

fn where_clause(filters: &[Filter<'_>]) -> (String, Vec<Value>) {
    if filters.is_empty() {
        return (String::new(), Vec::new());
    }
    let clause = filters
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{column} IS ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    let values = filters.iter().map(|(_, v)| to_value(*v)).collect();
    (format!(" WHERE {clause}"), values)
}

fn to_value(v: Option<i64>) -> Value {
    v.map_or(Value::Null, Value::Integer)
}

fn insert_row<T: Entity>(conn: &Connection, entity: &mut T) -> Result<i64> {
    let keys = entity.keys();
    let mut columns: Vec<&str> = keys.iter().map(|(c, _)| *c).collect();
    columns.push("body");
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();

    let mut values: Vec<Value> = keys.iter().map(|(_, v)| to_value(*v)).collect();
    values.push(Value::Text(serde_json::to_string(entity)?));

    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            T::TABLE,
            columns.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(values),
    )?;
    let id = conn.last_insert_rowid();
    entity.set_id(id);
    Ok(id)
}

fn update_row<T: Entity>(conn: &Connection, entity: &T) -> Result<()> {
    let keys = entity.keys();
    let mut sets: Vec<String> = keys.iter().enumerate().map(|(i, (c, _))| format!("{c} = ?{}", i + 1)).collect();
    sets.push(format!("body = ?{}", keys.len() + 1));

    let mut values: Vec<Value> = keys.iter().map(|(_, v)| to_value(*v)).collect();
    values.push(Value::Text(serde_json::to_string(entity)?));
    values.push(Value::Integer(entity.id()));

    let changed = conn.execute(
        &format!("UPDATE {} SET {} WHERE id = ?{}", T::TABLE, sets.join(", "), keys.len() + 2),
        params_from_iter(values),
    )?;
    if changed == 0 {
        return Err(Error::not_found(T::NAME, entity.id()));
    }
    Ok(())
}

fn decode<T: Entity>(id: i64, body: &str) -> Result<T> {
    let mut entity: T = serde_json::from_str(body)
        .map_err(|e| Error::Serialization(format!("{} {id}: {e}", T::NAME)))?;
    entity.set_id(id);
    Ok(entity)
}

fn get_row<T: Entity>(conn: &Connection, id: i64) -> Result<T> {
    let body: Option<String> = conn
        .query_row(&format!("SELECT body FROM {} WHERE id = ?1", T::TABLE), [id], |row| row.get(0))
        .optional()?;
    match body {
        Some(body) => decode(id, &body),
        None => Err(Error::not_found(T::NAME, id)),
    }
}

fn find_rows<T: Entity>(conn: &Connection, filters: &[Filter<'_>]) -> Result<Vec<T>> {
    let (clause, values) = where_clause(filters);
    let mut stmt = conn.prepare(&format!("SELECT id, body FROM {}{clause} ORDER BY id", T::TABLE))?;
    let rows = stmt.query_map(params_from_iter(values), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut result = Vec::new();
    for row in rows {
        let (id, body) = row?;
        result.push(decode(id, &body)?);
    }
    Ok(result)
}

fn delete_row<T: Entity>(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(&format!("DELETE FROM {} WHERE id = ?1", T::TABLE), [id])?;
    Ok(())
}
