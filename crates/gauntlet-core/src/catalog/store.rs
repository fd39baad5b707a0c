//! Typed CRUD over the on-disk catalog.
//!
//! Records live as `<collection-dir>/<id>.json`. The id is the filename, not
//! a field in the document; it is injected when a record is read, along with
//! a `created_date` derived from the file when the document lacks one.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::catalog::cookbook::Cookbook;
use crate::catalog::dataset::{DatasetExample, DatasetHandle, DatasetMeta};
use crate::catalog::endpoint::EndpointSpec;
use crate::catalog::recipe::Recipe;
use crate::catalog::runner::RunnerRecord;
use crate::catalog::slug::slugify;
use crate::catalog::template::PromptTemplate;
use crate::config::{Collection, EnvConfig};
use crate::errors::{CoreError, CoreResult};
use crate::storage::object::ObjectBackend;
use crate::storage::ObjectIo;

pub struct CatalogStore {
    cfg: EnvConfig,
    records: Arc<dyn ObjectIo>,
    datasets: Arc<dyn ObjectIo>,
}

impl CatalogStore {
    /// Eager reads for small records, streaming reads for datasets.
    pub fn new(cfg: EnvConfig) -> Self {
        Self {
            cfg,
            records: ObjectBackend::JsonEager.build(),
            datasets: ObjectBackend::JsonStreaming.build(),
        }
    }

    /// Swap either backend, e.g. to force streaming everywhere.
    pub fn with_backends(
        cfg: EnvConfig,
        records: Arc<dyn ObjectIo>,
        datasets: Arc<dyn ObjectIo>,
    ) -> Self {
        Self {
            cfg,
            records,
            datasets,
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.cfg
    }

    pub fn exists(&self, collection: Collection, id: &str) -> bool {
        self.records.exists(&self.cfg.record_path(collection, id))
    }

    /// Record ids in a collection, sorted.
    pub fn list_ids(&self, collection: Collection) -> CoreResult<Vec<String>> {
        let dir = self.cfg.dir(collection);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let files = self.records.list_by_ext(dir, "json")?;
        Ok(files
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect())
    }

    fn read_value(&self, collection: Collection, id: &str) -> CoreResult<Value> {
        let path = self.cfg.record_path(collection, id);
        if !self.records.exists(&path) {
            return Err(CoreError::not_found(collection.name(), id));
        }
        let mut value = self.records.read(&path)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("id".to_string(), Value::String(id.to_string()));
            if !map.get("created_date").is_some_and(|v| v.is_string()) {
                let stamp = self.records.created_at(&path)?.to_rfc3339();
                map.insert("created_date".to_string(), Value::String(stamp));
            }
        }
        Ok(value)
    }

    fn read_record<T: DeserializeOwned>(&self, collection: Collection, id: &str) -> CoreResult<T> {
        let value = self.read_value(collection, id)?;
        let record = serde_json::from_value(value)?;
        Ok(record)
    }

    /// Write a record under the slug of `name`. The id never goes into the
    /// document body.
    fn create_record<T: Serialize>(
        &self,
        collection: Collection,
        name: &str,
        record: &T,
    ) -> CoreResult<String> {
        let id = slugify(name);
        let path = self.cfg.record_path(collection, &id);
        if self.records.exists(&path) {
            return Err(CoreError::validation(format!(
                "{}/{id} already exists",
                collection.name()
            )));
        }
        let mut value = serde_json::to_value(record)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("id");
            if map.get("created_date").is_some_and(|v| v == "") {
                map.remove("created_date");
            }
        }
        self.records.create(&path, &value)?;
        Ok(id)
    }

    pub fn delete(&self, collection: Collection, id: &str) -> CoreResult<()> {
        let path = self.cfg.record_path(collection, id);
        if !self.records.exists(&path) {
            return Err(CoreError::not_found(collection.name(), id));
        }
        self.records.delete(&path)
    }

    // Endpoints

    pub fn create_endpoint(&self, spec: &EndpointSpec) -> CoreResult<String> {
        spec.validate()?;
        self.create_record(Collection::Endpoints, &spec.name, spec)
    }

    pub fn endpoint(&self, id: &str) -> CoreResult<EndpointSpec> {
        let spec: EndpointSpec = self.read_record(Collection::Endpoints, id)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn endpoints(&self) -> CoreResult<Vec<EndpointSpec>> {
        self.read_all(Collection::Endpoints, Self::endpoint)
    }

    // Recipes

    pub fn create_recipe(&self, recipe: &Recipe) -> CoreResult<String> {
        recipe.validate()?;
        self.create_record(Collection::Recipes, &recipe.name, recipe)
    }

    pub fn recipe(&self, id: &str) -> CoreResult<Recipe> {
        let recipe: Recipe = self.read_record(Collection::Recipes, id)?;
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn recipes(&self) -> CoreResult<Vec<Recipe>> {
        self.read_all(Collection::Recipes, Self::recipe)
    }

    // Cookbooks

    pub fn create_cookbook(&self, cookbook: &Cookbook) -> CoreResult<String> {
        cookbook.validate()?;
        self.create_record(Collection::Cookbooks, &cookbook.name, cookbook)
    }

    pub fn cookbook(&self, id: &str) -> CoreResult<Cookbook> {
        let cookbook: Cookbook = self.read_record(Collection::Cookbooks, id)?;
        cookbook.validate()?;
        Ok(cookbook)
    }

    pub fn cookbooks(&self) -> CoreResult<Vec<Cookbook>> {
        self.read_all(Collection::Cookbooks, Self::cookbook)
    }

    // Prompt templates

    pub fn create_template(&self, template: &PromptTemplate) -> CoreResult<String> {
        template.validate()?;
        self.create_record(Collection::PromptTemplates, &template.name, template)
    }

    pub fn template(&self, id: &str) -> CoreResult<PromptTemplate> {
        let template: PromptTemplate = self.read_record(Collection::PromptTemplates, id)?;
        template.validate()?;
        Ok(template)
    }

    pub fn templates(&self) -> CoreResult<Vec<PromptTemplate>> {
        self.read_all(Collection::PromptTemplates, Self::template)
    }

    // Runners

    pub fn create_runner(&self, runner: &RunnerRecord) -> CoreResult<String> {
        runner.validate()?;
        self.create_record(Collection::Runners, &runner.name, runner)
    }

    pub fn runner(&self, id: &str) -> CoreResult<RunnerRecord> {
        let runner: RunnerRecord = self.read_record(Collection::Runners, id)?;
        runner.validate()?;
        Ok(runner)
    }

    // Datasets

    /// Write a dataset document; examples are embedded under `examples`.
    pub fn create_dataset(
        &self,
        meta: &DatasetMeta,
        examples: &[DatasetExample],
    ) -> CoreResult<String> {
        if meta.name.trim().is_empty() {
            return Err(CoreError::validation("dataset name is empty"));
        }
        let id = slugify(&meta.name);
        let path = self.cfg.record_path(Collection::Datasets, &id);
        if self.datasets.exists(&path) {
            return Err(CoreError::validation(format!("datasets/{id} already exists")));
        }
        let doc = serde_json::json!({
            "name": meta.name,
            "description": meta.description,
            "license": meta.license,
            "reference": meta.reference,
            "examples": examples,
        });
        self.datasets.create(&path, &doc)?;
        Ok(id)
    }

    /// Lazy handle; examples are only touched when iterated.
    pub fn dataset(&self, id: &str) -> CoreResult<DatasetHandle> {
        let path = self.cfg.record_path(Collection::Datasets, id);
        if !self.datasets.exists(&path) {
            return Err(CoreError::not_found(Collection::Datasets.name(), id));
        }
        Ok(DatasetHandle::new(id, path, Arc::clone(&self.datasets)))
    }

    pub fn dataset_meta(&self, id: &str) -> CoreResult<DatasetMeta> {
        self.dataset(id)?.metadata()
    }

    fn read_all<T>(
        &self,
        collection: Collection,
        read: impl Fn(&Self, &str) -> CoreResult<T>,
    ) -> CoreResult<Vec<T>> {
        let mut out = Vec::new();
        for id in self.list_ids(collection)? {
            match read(self, &id) {
                Ok(record) => out.push(record),
                // A single corrupt file must not hide the rest of the catalog.
                Err(e) => warn!(collection = collection.name(), id = %id, error = %e, "skipping unreadable record"),
            }
        }
        Ok(out)
    }
}
