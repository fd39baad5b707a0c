//! Database facade.
//!
//! The run ledger and the prediction cache talk to a [`DbBackend`] rather
//! than to a concrete driver. Values cross the boundary as [`SqlValue`], the
//! lowest common denominator of SQL storage classes.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::errors::{CoreError, CoreResult};
use crate::storage::sqlite::SqliteBackend;

/// A value bound to, or read from, a SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Text content, or the empty string for any other storage class.
    pub fn text_or_empty(&self) -> &str {
        self.as_str().unwrap_or("")
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<usize> for SqlValue {
    fn from(v: usize) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One result row.
pub type SqlRow = Vec<SqlValue>;

/// Minimal SQL surface the engine needs from any driver.
pub trait DbBackend: Send + Sync {
    /// Run several statements separated by semicolons.
    fn execute_batch(&self, sql: &str) -> CoreResult<()>;

    /// Run one statement and return the affected row count.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> CoreResult<usize>;

    /// Run one INSERT and return the new rowid.
    fn insert(&self, sql: &str, params: &[SqlValue]) -> CoreResult<i64>;

    /// First matching row, if any.
    fn query_one(&self, sql: &str, params: &[SqlValue]) -> CoreResult<Option<SqlRow>>;

    /// All matching rows.
    fn query_many(&self, sql: &str, params: &[SqlValue]) -> CoreResult<Vec<SqlRow>>;

    fn table_exists(&self, name: &str) -> CoreResult<bool>;

    /// Column names of `table`, used for additive migrations.
    fn columns(&self, table: &str) -> CoreResult<HashSet<String>>;

    /// `ALTER TABLE ... ADD COLUMN` when the column is absent.
    fn add_column_if_missing(&self, table: &str, column: &str, ty: &str) -> CoreResult<()>;

    fn drop_table(&self, name: &str) -> CoreResult<()>;
}

impl fmt::Debug for dyn DbBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbBackend").finish_non_exhaustive()
    }
}

/// Resolve and open a database backend by name.
///
/// `sqlite` is the only driver shipped today; the name indirection keeps the
/// ledger and cache code driver-agnostic.
pub fn open_database(kind: &str, path: &Path) -> CoreResult<Arc<dyn DbBackend>> {
    match kind {
        "sqlite" => Ok(Arc::new(SqliteBackend::open(path)?)),
        other => Err(CoreError::UnknownBackend { kind: other.into() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_value_conversions() {
        assert_eq!(SqlValue::from(3i64), SqlValue::Integer(3));
        assert_eq!(SqlValue::from(7u64), SqlValue::Integer(7));
        assert_eq!(SqlValue::from(1.5f64), SqlValue::Real(1.5));
        assert_eq!(SqlValue::from("x"), SqlValue::Text("x".into()));
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("y")), SqlValue::Text("y".into()));
    }

    #[test]
    fn sql_value_accessors() {
        assert_eq!(SqlValue::Integer(4).as_f64(), Some(4.0));
        assert_eq!(SqlValue::Real(0.5).as_i64(), None);
        assert_eq!(SqlValue::Null.text_or_empty(), "");
        assert_eq!(SqlValue::Text("t".into()).text_or_empty(), "t");
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let err = open_database("postgres", Path::new("/tmp/never.db")).unwrap_err();
        assert!(matches!(err, CoreError::UnknownBackend { .. }));
    }
}
