//! Metric plug-in interface.
//!
//! A metric scores a batch of (prompt, predicted, target) triples and
//! returns a JSON mapping. The same call shape serves both the per-prompt
//! singleton evaluation and the per-bucket aggregation pass; a metric only
//! sees slices and never knows which pass it is in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{CoreError, CoreResult};
use crate::model::PredictedResult;

/// Key under which a metric publishes its grading contribution
/// (`{"grading_criteria": {"<criterion>": <0..=100>}}`).
pub const GRADING_CRITERIA_KEY: &str = "grading_criteria";

/// A scoring plug-in.
#[async_trait]
pub trait Metric: Send + Sync {
    /// Stable id used in recipes.
    fn id(&self) -> &str;

    /// Score parallel slices of prompts, predictions and targets.
    ///
    /// The slices always have equal length. Returns a mapping merged into
    /// `evaluation_results` (per-prompt pass) or published verbatim in the
    /// bucket's metric list (aggregation pass).
    async fn get_results(
        &self,
        prompts: &[String],
        predicted: &[PredictedResult],
        targets: &[Value],
    ) -> CoreResult<serde_json::Map<String, Value>>;
}

impl fmt::Debug for dyn Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric").field("id", &self.id()).finish()
    }
}

/// Name-indexed metric collection handed to the engine.
#[derive(Default, Clone)]
pub struct MetricRegistry {
    metrics: HashMap<String, Arc<dyn Metric>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the metric's own id; the last registration wins.
    pub fn register(&mut self, metric: Arc<dyn Metric>) {
        self.metrics.insert(metric.id().to_string(), metric);
    }

    pub fn get(&self, id: &str) -> CoreResult<Arc<dyn Metric>> {
        self.metrics
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownModule {
                kind: "metric",
                id: id.to_string(),
            })
    }

    /// Resolve every id up front so a typo fails before any prompt is spent.
    pub fn resolve_all(&self, ids: &[String]) -> CoreResult<Vec<Arc<dyn Metric>>> {
        ids.iter().map(|id| self.get(id)).collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.metrics.keys().map(String::as_str).collect();
        out.sort_unstable();
        out
    }
}

/// Text form of a target value: strings pass through, everything else is
/// compact JSON. Metrics compare against this.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
