//! Object storage facade.
//!
//! Catalog records and datasets are JSON documents on disk. Every component
//! goes through [`ObjectIo`] so the read strategy (eager vs streaming) can be
//! swapped per call site without touching callers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::{CoreError, CoreResult};
use crate::storage::json::{EagerJson, StreamingJson};

/// Flow control for [`ObjectIo::for_each_item`] callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFlow {
    Continue,
    Stop,
}

/// Uniform interface over serialized JSON objects.
///
/// `item_path` arguments name a top-level key whose value is an array, in
/// dotted form with an optional `.item` suffix (`"examples"` and
/// `"examples.item"` are equivalent).
pub trait ObjectIo: Send + Sync {
    /// Serialize `value` to `path`, creating parent directories as needed.
    fn create(&self, path: &Path, value: &Value) -> CoreResult<()>;

    /// Read the whole document.
    fn read(&self, path: &Path) -> CoreResult<Value>;

    /// Read only the named top-level keys. Missing keys are simply absent
    /// from the returned map.
    fn read_keys(&self, path: &Path, keys: &[&str]) -> CoreResult<serde_json::Map<String, Value>>;

    /// Count the elements of the array at `item_path`.
    fn count_items(&self, path: &Path, item_path: &str) -> CoreResult<usize>;

    /// Visit each element of the array at `item_path` in document order.
    ///
    /// The callback receives the element index and value and decides whether
    /// to keep going. Visiting is best effort after a `Stop`: remaining
    /// elements are skipped, not buffered.
    fn for_each_item(
        &self,
        path: &Path,
        item_path: &str,
        f: &mut dyn FnMut(usize, Value) -> ItemFlow,
    ) -> CoreResult<()>;

    fn delete(&self, path: &Path) -> CoreResult<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Last-modified timestamp of the underlying file.
    fn created_at(&self, path: &Path) -> CoreResult<DateTime<Utc>>;

    /// Hex-encoded SHA-256 of the file bytes.
    fn content_hash(&self, path: &Path) -> CoreResult<String>;

    /// Files in `dir` with the given extension, lexicographically sorted.
    fn list_by_ext(&self, dir: &Path, ext: &str) -> CoreResult<Vec<PathBuf>>;
}

impl fmt::Debug for dyn ObjectIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectIo").finish_non_exhaustive()
    }
}

/// Named read strategies for JSON documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectBackend {
    /// Parse the whole document into memory. Fine for catalog records.
    JsonEager,
    /// Visit array items without materializing the document. The default for
    /// datasets, which can hold hundreds of thousands of examples.
    JsonStreaming,
}

impl ObjectBackend {
    /// Resolve a backend by name.
    pub fn parse(kind: &str) -> CoreResult<Self> {
        match kind {
            "json-eager" => Ok(Self::JsonEager),
            "json" | "json-streaming" => Ok(Self::JsonStreaming),
            other => Err(CoreError::UnknownBackend { kind: other.into() }),
        }
    }

    /// Instantiate the backend.
    pub fn build(self) -> Arc<dyn ObjectIo> {
        match self {
            Self::JsonEager => Arc::new(EagerJson),
            Self::JsonStreaming => Arc::new(StreamingJson),
        }
    }
}

/// Resolve and instantiate an object backend in one step.
pub fn object_backend(kind: &str) -> CoreResult<Arc<dyn ObjectIo>> {
    Ok(ObjectBackend::parse(kind)?.build())
}

/// Strip the `.item` suffix used by dotted item paths.
pub(crate) fn item_key(item_path: &str) -> &str {
    item_path.strip_suffix(".item").unwrap_or(item_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_resolve() {
        assert_eq!(
            ObjectBackend::parse("json-eager").unwrap(),
            ObjectBackend::JsonEager
        );
        assert_eq!(
            ObjectBackend::parse("json").unwrap(),
            ObjectBackend::JsonStreaming
        );
        assert!(matches!(
            ObjectBackend::parse("parquet"),
            Err(CoreError::UnknownBackend { .. })
        ));
    }

    #[test]
    fn item_key_strips_suffix() {
        assert_eq!(item_key("examples.item"), "examples");
        assert_eq!(item_key("examples"), "examples");
    }
}
