//! Dataset access.
//!
//! Datasets can be far larger than memory, so they are never read whole:
//! metadata comes through selective key reads and examples through the
//! streaming item visitor.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{CoreError, CoreResult};
use crate::storage::{ItemFlow, ObjectIo};

/// Top-level key holding the example array in a dataset document.
pub const EXAMPLES_KEY: &str = "examples";

/// Dataset header, without the examples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetMeta {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub num_of_dataset_prompts: usize,
}

/// One benchmark example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetExample {
    pub input: String,
    pub target: Value,
}

/// Lazy view over one dataset file.
#[derive(Debug, Clone)]
pub struct DatasetHandle {
    id: String,
    path: PathBuf,
    io: Arc<dyn ObjectIo>,
}

impl DatasetHandle {
    pub fn new(id: impl Into<String>, path: PathBuf, io: Arc<dyn ObjectIo>) -> Self {
        Self {
            id: id.into(),
            path,
            io,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of examples, computed without materializing them.
    pub fn count(&self) -> CoreResult<usize> {
        self.io.count_items(&self.path, EXAMPLES_KEY)
    }

    /// Header fields plus the example count.
    pub fn metadata(&self) -> CoreResult<DatasetMeta> {
        let keys = self
            .io
            .read_keys(&self.path, &["name", "description", "license", "reference"])?;
        let mut meta: DatasetMeta = serde_json::from_value(Value::Object(keys))?;
        meta.id = self.id.clone();
        meta.num_of_dataset_prompts = self.count()?;
        Ok(meta)
    }

    /// Visit examples in document order. Malformed examples are reported to
    /// the callback as errors without stopping the stream.
    pub fn for_each(
        &self,
        f: &mut dyn FnMut(usize, CoreResult<DatasetExample>) -> ItemFlow,
    ) -> CoreResult<()> {
        self.io.for_each_item(&self.path, EXAMPLES_KEY, &mut |index, item| {
            let example = serde_json::from_value::<DatasetExample>(item).map_err(|e| {
                CoreError::validation(format!("dataset {}: bad example {index}: {e}", self.id))
            });
            f(index, example)
        })
    }

    /// Hash of the raw dataset bytes; part of the sampling reproducibility
    /// contract.
    pub fn content_hash(&self) -> CoreResult<String> {
        self.io.content_hash(&self.path)
    }
}
