//! Prediction cache: completed connector calls keyed by what was asked.
//!
//! A row is identified by (recipe, connection, prompt template, prompt text);
//! the dataset id is stored and part of the uniqueness constraint but does
//! not participate in lookups, so the same prompt reaching a connector twice
//! through different datasets still hits. Read failures degrade to a miss so
//! a damaged cache can never sink a run; write failures are reported.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::errors::{CoreError, CoreResult};
use crate::model::{PredictedResult, Prediction};
use crate::run::literal::parse_lenient;
use crate::storage::{DbBackend, SqlValue};

/// A cache row worth reusing.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub predicted_results: PredictedResult,
    /// Seconds the original connector call took.
    pub duration: f64,
    pub target: Value,
}

/// Cache handle bound to one run's provenance (seed and system prompt are
/// stored with every row but never looked up by).
pub struct PredictionCache {
    backend: Arc<dyn DbBackend>,
    random_seed: u64,
    system_prompt: String,
}

impl PredictionCache {
    pub fn new(
        backend: Arc<dyn DbBackend>,
        random_seed: u64,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            random_seed,
            system_prompt: system_prompt.into(),
        }
    }

    /// Look up a prior prediction for this prompt. Any internal failure is
    /// logged and reported as a miss.
    pub fn get(&self, pred: &Prediction) -> Option<CacheHit> {
        match self.lookup(pred) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(
                    error = %e,
                    connection_id = %pred.connection_id,
                    recipe_id = %pred.recipe_id,
                    "cache read failed, treating as miss"
                );
                None
            }
        }
    }

    fn lookup(&self, pred: &Prediction) -> CoreResult<Option<CacheHit>> {
        let sql = "SELECT predicted_results, duration, target FROM cache_table \
             WHERE recipe_id = ?1 AND connection_id = ?2 AND prompt_template_id = ?3 \
             AND prompt = ?4 ORDER BY id DESC LIMIT 1";
        let params: [SqlValue; 4] = [
            pred.recipe_id.as_str().into(),
            pred.connection_id.as_str().into(),
            pred.prompt_template_id.as_str().into(),
            pred.prompt.as_str().into(),
        ];
        let Some(row) = self.backend.query_one(sql, &params)? else {
            return Ok(None);
        };
        Ok(Some(CacheHit {
            predicted_results: parse_predicted(row[0].text_or_empty()),
            duration: row[1].as_f64().unwrap_or(0.0),
            target: parse_lenient(row[2].text_or_empty()),
        }))
    }

    /// Store a completed prediction. Predictions without connector output are
    /// skipped; a later identical ask overwrites the row.
    pub fn put(&self, pred: &Prediction) -> CoreResult<()> {
        let Some(predicted) = &pred.predicted_results else {
            return Ok(());
        };
        let sql = "INSERT INTO cache_table (connection_id, recipe_id, dataset_id, \
             prompt_template_id, prompt_index, prompt, target, predicted_results, duration, \
             random_seed, system_prompt) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT (recipe_id, connection_id, prompt_template_id, prompt, dataset_id) \
             DO UPDATE SET prompt_index = excluded.prompt_index, target = excluded.target, \
             predicted_results = excluded.predicted_results, duration = excluded.duration, \
             random_seed = excluded.random_seed, system_prompt = excluded.system_prompt";
        let params: [SqlValue; 11] = [
            pred.connection_id.as_str().into(),
            pred.recipe_id.as_str().into(),
            pred.dataset_id.as_str().into(),
            pred.prompt_template_id.as_str().into(),
            pred.prompt_index.into(),
            pred.prompt.as_str().into(),
            serde_json::to_string(&pred.target)?.into(),
            serde_json::to_string(predicted)?.into(),
            pred.duration.into(),
            self.random_seed.into(),
            self.system_prompt.as_str().into(),
        ];
        self.backend
            .insert(sql, &params)
            .map_err(|e| CoreError::cache(format!("cache write failed: {e}")))?;
        Ok(())
    }

    /// Number of cached predictions.
    pub fn count(&self) -> CoreResult<i64> {
        let row = self
            .backend
            .query_one("SELECT COUNT(*) FROM cache_table", &[])?;
        Ok(row.and_then(|r| r[0].as_i64()).unwrap_or(0))
    }
}

/// Stored connector output. Current rows hold a serialized
/// [`PredictedResult`]; rows from older tooling hold the bare response text.
fn parse_predicted(raw: &str) -> PredictedResult {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(s)) => PredictedResult::text(s),
        Ok(v @ Value::Object(_)) => {
            serde_json::from_value(v).unwrap_or_else(|_| PredictedResult::text(raw))
        }
        _ => PredictedResult::text(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PromptRequest, PromptStatus};
    use crate::run::db::RunDb;
    use crate::storage::sqlite::SqliteBackend;
    use serde_json::json;

    fn cache() -> PredictionCache {
        let db = RunDb::with_backend(Arc::new(SqliteBackend::memory().unwrap())).unwrap();
        PredictionCache::new(db.backend(), 42, "be brief")
    }

    fn prediction(prompt: &str, dataset: &str, response: &str) -> Prediction {
        let mut pred = Prediction::from_request(
            PromptRequest {
                recipe_id: "colors".into(),
                dataset_id: dataset.into(),
                prompt_template_id: "mcq".into(),
                prompt_index: 0,
                prompt: prompt.into(),
                target: json!("blue"),
            },
            "ep-a",
        );
        pred.predicted_results = Some(PredictedResult::text(response));
        pred.duration = 1.25;
        pred.status = PromptStatus::Completed;
        pred
    }

    #[test]
    fn miss_then_hit_roundtrip() -> anyhow::Result<()> {
        let cache = cache();
        let pred = prediction("what colour is the sky?", "ds1", "blue");
        assert!(cache.get(&pred).is_none());

        cache.put(&pred)?;
        let hit = cache.get(&pred).unwrap();
        assert_eq!(hit.predicted_results.response, "blue");
        assert_eq!(hit.duration, 1.25);
        assert_eq!(hit.target, json!("blue"));
        assert_eq!(cache.count()?, 1);
        Ok(())
    }

    #[test]
    fn rewrite_of_same_ask_keeps_one_row() -> anyhow::Result<()> {
        let cache = cache();
        cache.put(&prediction("p", "ds1", "first"))?;
        cache.put(&prediction("p", "ds1", "second"))?;
        assert_eq!(cache.count()?, 1);
        let hit = cache.get(&prediction("p", "ds1", "ignored")).unwrap();
        assert_eq!(hit.predicted_results.response, "second");
        Ok(())
    }

    #[test]
    fn dataset_id_is_stored_but_not_looked_up() -> anyhow::Result<()> {
        let cache = cache();
        cache.put(&prediction("p", "ds1", "old"))?;
        cache.put(&prediction("p", "ds2", "new"))?;
        assert_eq!(cache.count()?, 2);
        // Newest row wins the four-column lookup.
        let hit = cache.get(&prediction("p", "ds3", "ignored")).unwrap();
        assert_eq!(hit.predicted_results.response, "new");
        Ok(())
    }

    #[test]
    fn failed_prediction_is_not_stored() -> anyhow::Result<()> {
        let cache = cache();
        let mut pred = prediction("p", "ds1", "unused");
        pred.predicted_results = None;
        pred.fail("boom");
        cache.put(&pred)?;
        assert_eq!(cache.count()?, 0);
        Ok(())
    }

    #[test]
    fn legacy_rows_fall_back_to_raw_text() -> anyhow::Result<()> {
        let db = RunDb::with_backend(Arc::new(SqliteBackend::memory()?))?;
        db.backend().insert(
            "INSERT INTO cache_table (connection_id, recipe_id, dataset_id, \
             prompt_template_id, prompt_index, prompt, target, predicted_results, duration) \
             VALUES ('ep-a', 'colors', 'ds1', 'mcq', 0, 'p', ?1, ?2, 0.5)",
            &["('red', 'blue')".into(), "bare response".into()],
        )?;
        let cache = PredictionCache::new(db.backend(), 0, "");
        let hit = cache.get(&prediction("p", "ds1", "ignored")).unwrap();
        assert_eq!(hit.predicted_results.response, "bare response");
        assert_eq!(hit.target, json!(["red", "blue"]));
        Ok(())
    }

    #[test]
    fn broken_backend_reads_as_miss() {
        // No schema at all: the read fails internally and surfaces as a miss.
        let backend = Arc::new(SqliteBackend::memory().unwrap());
        let cache = PredictionCache::new(backend, 0, "");
        assert!(cache.get(&prediction("p", "ds1", "x")).is_none());
    }
}
