//! Namespaced key-value store
//!
//! Small structured data shared by producers and devices, persisted in
//! `SQLite`. Independent of the action pipeline; served under the same
//! authentication gate. Writes are last-write-wins.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::Value;

use crate::{Error, Result};

/// Connection pool for the KV database
pub type KvPool = Pool<SqliteConnectionManager>;

/// Pooled KV connection
pub type KvConn = PooledConnection<SqliteConnectionManager>;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    tbl TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    expires_at INTEGER,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tbl, key)
)";

/// Key-value store scoped by `(table, key)`
#[derive(Debug, Clone)]
pub struct KvStore {
    pool: KvPool,
}

impl KvStore {
    /// Open (or create) the store at the given path
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or initialized
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| Error::Database(e.to_string()))?;
        Self::init(pool)
    }

    /// Open an in-memory store (for testing)
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be initialized
    pub fn open_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| Error::Database(e.to_string()))?;
        Self::init(pool)
    }

    fn init(pool: KvPool) -> Result<Self> {
        let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(SCHEMA, [])?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<KvConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Set a value, optionally expiring after `ttl`
    ///
    /// # Errors
    ///
    /// Returns error if the write fails or the value cannot be serialized
    pub fn set(&self, table: &str, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at: Option<i64> = ttl.and_then(|t| {
            i64::try_from(t.as_secs())
                .ok()
                .map(|secs| Utc::now().timestamp() + secs)
        });
        let raw = serde_json::to_string(value)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv (tbl, key, value, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (tbl, key) DO UPDATE SET
               value = excluded.value,
               expires_at = excluded.expires_at,
               updated_at = excluded.updated_at",
            rusqlite::params![table, key, raw, expires_at, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Get a value, skipping expired entries
    ///
    /// # Errors
    ///
    /// Returns error if the read fails
    pub fn get(&self, table: &str, key: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv
                 WHERE tbl = ?1 AND key = ?2
                   AND (expires_at IS NULL OR expires_at >= ?3)",
                rusqlite::params![table, key, Utc::now().timestamp()],
                |row| row.get(0),
            )
            .ok();
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Get a value coerced to an integer, with `default` on absence or
    /// parse failure
    ///
    /// # Errors
    ///
    /// Returns error if the read fails
    pub fn get_int(&self, table: &str, key: &str, default: i64) -> Result<i64> {
        let value = self.get(table, key)?;
        Ok(value.map_or(default, |v| coerce_int(&v).unwrap_or(default)))
    }

    /// Delete every key in `table` starting with `prefix`
    ///
    /// Runs as a single statement, atomic from the caller's perspective.
    /// Returns the number of deleted rows.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails
    pub fn delete_prefix(&self, table: &str, prefix: &str) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM kv WHERE tbl = ?1 AND substr(key, 1, length(?2)) = ?2",
            rusqlite::params![table, prefix],
        )?;
        Ok(deleted)
    }

    /// Purge expired rows, returning the count
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails
    pub fn sweep_expired(&self) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at < ?1",
            rusqlite::params![Utc::now().timestamp()],
        )?;
        Ok(deleted)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
