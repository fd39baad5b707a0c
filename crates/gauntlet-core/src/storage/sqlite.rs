//! SQLite driver behind the database facade.
//!
//! One connection guarded by a mutex. The engine's write rate is a handful
//! of rows per prompt, so a single serialized connection is plenty and keeps
//! transactional reasoning trivial.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params_from_iter, Connection};

use crate::errors::CoreResult;
use crate::storage::db::{DbBackend, SqlRow, SqlValue};

/// SQLite-backed [`DbBackend`].
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a database file, creating parent directories.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn to_driver(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Null => rusqlite::types::Value::Null,
        SqlValue::Integer(v) => rusqlite::types::Value::Integer(*v),
        SqlValue::Real(v) => rusqlite::types::Value::Real(*v),
        SqlValue::Text(v) => rusqlite::types::Value::Text(v.clone()),
        SqlValue::Blob(v) => rusqlite::types::Value::Blob(v.clone()),
    }
}

fn from_driver(value: rusqlite::types::Value) -> SqlValue {
    match value {
        rusqlite::types::Value::Null => SqlValue::Null,
        rusqlite::types::Value::Integer(v) => SqlValue::Integer(v),
        rusqlite::types::Value::Real(v) => SqlValue::Real(v),
        rusqlite::types::Value::Text(v) => SqlValue::Text(v),
        rusqlite::types::Value::Blob(v) => SqlValue::Blob(v),
    }
}

impl DbBackend for SqliteBackend {
    fn execute_batch(&self, sql: &str) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> CoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(sql, params_from_iter(params.iter().map(to_driver)))?;
        Ok(changed)
    }

    fn insert(&self, sql: &str, params: &[SqlValue]) -> CoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(sql, params_from_iter(params.iter().map(to_driver)))?;
        Ok(conn.last_insert_rowid())
    }

    fn query_one(&self, sql: &str, params: &[SqlValue]) -> CoreResult<Option<SqlRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let cols = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_driver)))?;
        match rows.next()? {
            Some(row) => {
                let mut out = Vec::with_capacity(cols);
                for i in 0..cols {
                    out.push(from_driver(row.get::<_, rusqlite::types::Value>(i)?));
                }
                Ok(Some(out))
            }
            None => Ok(None),
        }
    }

    fn query_many(&self, sql: &str, params: &[SqlValue]) -> CoreResult<Vec<SqlRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let cols = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_driver)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(cols);
            for i in 0..cols {
                record.push(from_driver(row.get::<_, rusqlite::types::Value>(i)?));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn table_exists(&self, name: &str) -> CoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        let found = stmt.exists([name])?;
        Ok(found)
    }

    fn columns(&self, table: &str) -> CoreResult<HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        let mut out = HashSet::new();
        for r in rows {
            out.insert(r?);
        }
        Ok(out)
    }

    fn add_column_if_missing(&self, table: &str, column: &str, ty: &str) -> CoreResult<()> {
        if self.columns(table)?.contains(column) {
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {ty}"), [])?;
        Ok(())
    }

    fn drop_table(&self, name: &str) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {name}"))?;
        Ok(())
    }
}
