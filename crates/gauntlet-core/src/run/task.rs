//! One task: a connector working through a recipe's prompts for one
//! prompt template.
//!
//! `process_prompt` is infallible by design. Whatever goes wrong with a
//! single prompt is captured inside the returned [`Prediction`]; only the
//! engine decides what run-level consequences an error has.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connectors::{Connector, PredictionCallback};
use crate::errors::CoreError;
use crate::metrics_api::Metric;
use crate::model::{Prediction, PromptRequest, PromptStatus, TaskStatus};
use crate::run::cache::PredictionCache;

/// Everything a task needs to process prompts.
pub struct TaskSetup {
    pub connector: Arc<Connector>,
    pub recipe_id: String,
    pub prompt_template_id: String,
    pub metrics: Vec<Arc<dyn Metric>>,
    pub cache: Arc<PredictionCache>,
    pub use_cache: bool,
    pub cancel: CancellationToken,
    pub callback: Option<Arc<PredictionCallback<'static>>>,
    /// Prompts in flight at once within this task.
    pub concurrency_limit: usize,
}

impl TaskSetup {
    pub fn build(self) -> TaskProcessor {
        TaskProcessor {
            id: Uuid::new_v4().to_string(),
            gate: Semaphore::new(self.concurrency_limit.max(1)),
            connector: self.connector,
            recipe_id: self.recipe_id,
            prompt_template_id: self.prompt_template_id,
            metrics: self.metrics,
            cache: self.cache,
            use_cache: self.use_cache,
            cancel: self.cancel,
            callback: self.callback,
            status: Mutex::new(TaskStatus::Pending),
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }
}

/// Processes prompts for one (connector, recipe, prompt template) triple.
pub struct TaskProcessor {
    id: String,
    connector: Arc<Connector>,
    recipe_id: String,
    prompt_template_id: String,
    metrics: Vec<Arc<dyn Metric>>,
    cache: Arc<PredictionCache>,
    use_cache: bool,
    cancel: CancellationToken,
    callback: Option<Arc<PredictionCallback<'static>>>,
    gate: Semaphore,
    status: Mutex<TaskStatus>,
    processed: AtomicUsize,
    failed: AtomicUsize,
}

impl TaskProcessor {
    /// Unique id of this task instance, fresh per run.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connector_id(&self) -> &str {
        self.connector.id()
    }

    pub fn prompt_template_id(&self) -> &str {
        &self.prompt_template_id
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.lock().unwrap()
    }

    pub fn processed_count(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn start(&self) {
        self.set_status(TaskStatus::Running);
    }

    /// Drive one prompt through cache, connector and metrics. The returned
    /// prediction always carries a terminal prompt status.
    pub async fn process_prompt(&self, request: PromptRequest) -> Prediction {
        self.set_status(TaskStatus::RunningPromptProcessing);
        let mut pred = Prediction::from_request(request.clone(), self.connector.id());
        if self.cancel.is_cancelled() {
            pred.status = PromptStatus::Cancelled;
            return pred;
        }
        let Ok(_permit) = self.gate.acquire().await else {
            // The semaphore is never closed while tasks are alive.
            pred.fail("task concurrency gate closed");
            return pred;
        };
        if self.cancel.is_cancelled() {
            pred.status = PromptStatus::Cancelled;
            return pred;
        }
        pred.status = PromptStatus::Running;

        let hit = if self.use_cache { self.cache.get(&pred) } else { None };
        match hit {
            Some(hit) => {
                debug!(
                    connector = %pred.connection_id,
                    recipe = %pred.recipe_id,
                    prompt_index = pred.prompt_index,
                    "cache hit"
                );
                pred.duration = hit.duration;
                pred.predicted_results = Some(hit.predicted_results);
            }
            None => {
                pred.status = PromptStatus::RunningQueryConnector;
                match self
                    .connector
                    .get_prediction(request, self.callback.as_deref())
                    .await
                {
                    Ok(done) => {
                        pred.duration = done.duration;
                        pred.predicted_results = done.predicted_results;
                        pred.status = PromptStatus::CompletedQueryConnector;
                        if let Err(e) = self.cache.put(&pred) {
                            warn!(error = %e, connector = %pred.connection_id, "prediction not cached");
                            pred.error_messages.push(e.to_string());
                        }
                    }
                    Err(CoreError::Cancelled) => {
                        pred.status = PromptStatus::Cancelled;
                        return pred;
                    }
                    Err(e) => {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        self.processed.fetch_add(1, Ordering::Relaxed);
                        pred.fail(e.to_string());
                        return pred;
                    }
                }
            }
        }

        // Cancellation checkpoint between the connector call and metrics.
        if self.cancel.is_cancelled() {
            pred.status = PromptStatus::Cancelled;
            return pred;
        }

        let Some(predicted) = pred.predicted_results.clone() else {
            // Unreachable with the connectors shipped today, but a client
            // contract violation must not panic a run.
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.processed.fetch_add(1, Ordering::Relaxed);
            pred.fail("connector returned no predicted results");
            return pred;
        };

        pred.status = PromptStatus::RunningMetricsEvaluation;
        let prompts = [pred.prompt.clone()];
        let predicted = [predicted];
        let targets = [pred.target.clone()];
        for metric in &self.metrics {
            match metric.get_results(&prompts, &predicted, &targets).await {
                Ok(results) => {
                    for (key, value) in results {
                        pred.evaluation_results.insert(key, value);
                    }
                }
                Err(e) => {
                    warn!(error = %e, metric = metric.id(), "metric evaluation failed");
                    pred.error_messages.push(e.to_string());
                }
            }
        }
        pred.status = PromptStatus::CompletedMetricsEvaluation;

        self.processed.fetch_add(1, Ordering::Relaxed);
        if pred.error_messages.is_empty() {
            pred.status = PromptStatus::Completed;
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            pred.status = PromptStatus::CompletedWithErrors;
        }
        pred
    }

    /// Settle the task's terminal status once its prompts are exhausted.
    pub fn finish(&self) -> TaskStatus {
        let status = if self.cancel.is_cancelled() {
            TaskStatus::Cancelled
        } else {
            self.set_status(TaskStatus::CompletedPromptProcessing);
            if self.failed.load(Ordering::Relaxed) > 0 {
                TaskStatus::CompletedWithErrors
            } else {
                TaskStatus::Completed
            }
        };
        self.set_status(status);
        status
    }

    fn set_status(&self, status: TaskStatus) {
        let mut current = self.status.lock().unwrap();
        if *current != status {
            debug!(
                task = %self.id,
                connector = %self.connector.id(),
                recipe = %self.recipe_id,
                template = %self.prompt_template_id,
                from = current.as_str(),
                to = status.as_str(),
                "task status"
            );
            *current = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EndpointSpec;
    use crate::metrics_api::GRADING_CRITERIA_KEY;
    use crate::model::PredictedResult;
    use crate::run::db::RunDb;
    use crate::storage::sqlite::SqliteBackend;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct MatchTarget;

    #[async_trait]
    impl Metric for MatchTarget {
        fn id(&self) -> &str {
            "match_target"
        }

        async fn get_results(
            &self,
            _prompts: &[String],
            predicted: &[PredictedResult],
            targets: &[Value],
        ) -> crate::errors::CoreResult<serde_json::Map<String, Value>> {
            let hits = predicted
                .iter()
                .zip(targets)
                .filter(|(p, t)| Some(p.response.as_str()) == t.as_str())
                .count();
            let accuracy = hits as f64 * 100.0 / predicted.len().max(1) as f64;
            let mut out = serde_json::Map::new();
            out.insert("match_target".into(), json!(accuracy));
            out.insert(GRADING_CRITERIA_KEY.into(), json!({ "accuracy": accuracy }));
            Ok(out)
        }
    }

    fn task_over(params: Value, cancel: CancellationToken) -> (Arc<PredictionCache>, TaskProcessor) {
        let spec: EndpointSpec = serde_json::from_value(json!({
            "name": "Echo",
            "connector_type": "echo",
            "max_calls_per_second": 100,
            "max_concurrency": 4,
            "model": "echo-1",
            "params": params,
        }))
        .unwrap();
        let mut connector = Connector::from_spec(&spec).unwrap();
        connector.bind_cancel(cancel.clone());
        let db = RunDb::with_backend(Arc::new(SqliteBackend::memory().unwrap())).unwrap();
        let cache = Arc::new(PredictionCache::new(db.backend(), 0, ""));
        let processor = TaskSetup {
            connector: Arc::new(connector),
            recipe_id: "colors".into(),
            prompt_template_id: "no-template".into(),
            metrics: vec![Arc::new(MatchTarget)],
            cache: Arc::clone(&cache),
            use_cache: true,
            cancel,
            callback: None,
            concurrency_limit: 2,
        }
        .build();
        (cache, processor)
    }

    fn request(prompt: &str, target: &str) -> PromptRequest {
        PromptRequest {
            recipe_id: "colors".into(),
            dataset_id: "ds".into(),
            prompt_template_id: "no-template".into(),
            prompt_index: 0,
            prompt: prompt.into(),
            target: json!(target),
        }
    }

    #[tokio::test]
    async fn prompt_flows_to_completed_and_caches() -> anyhow::Result<()> {
        let (cache, task) = task_over(
            json!({"responses": {"sky": "blue"}}),
            CancellationToken::new(),
        );
        task.start();

        let pred = task.process_prompt(request("sky", "blue")).await;
        assert!(!task.id().is_empty());
        assert_eq!(pred.status, PromptStatus::Completed);
        assert_eq!(
            pred.predicted_results.as_ref().map(|p| p.response.as_str()),
            Some("blue")
        );
        assert_eq!(pred.evaluation_results.get("match_target"), Some(&json!(100.0)));
        assert_eq!(
            pred.evaluation_results
                .get(GRADING_CRITERIA_KEY)
                .and_then(|g| g.pointer("/accuracy")),
            Some(&json!(100.0))
        );
        assert_eq!(cache.count()?, 1);
        assert_eq!(task.finish(), TaskStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn second_ask_is_served_from_cache() -> anyhow::Result<()> {
        let (cache, task) = task_over(
            json!({"responses": {"sky": "blue"}}),
            CancellationToken::new(),
        );
        task.start();
        task.process_prompt(request("sky", "blue")).await;
        let again = task.process_prompt(request("sky", "blue")).await;
        assert_eq!(again.status, PromptStatus::Completed);
        assert_eq!(cache.count()?, 1);
        assert_eq!(task.processed_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn connector_failure_marks_the_prompt_only() {
        let (cache, task) = task_over(
            json!({
                "errors": {"sky": "quota exhausted"},
                "error_status": 400,
            }),
            CancellationToken::new(),
        );
        task.start();
        let pred = task.process_prompt(request("sky", "blue")).await;
        assert_eq!(pred.status, PromptStatus::CompletedWithErrors);
        assert!(pred.error_messages[0].contains("quota exhausted"));
        assert!(pred.predicted_results.is_none());
        assert_eq!(cache.count().unwrap(), 0);
        assert_eq!(task.failed_count(), 1);
        assert_eq!(task.finish(), TaskStatus::CompletedWithErrors);
    }

    #[tokio::test]
    async fn cancelled_task_skips_work() {
        let cancel = CancellationToken::new();
        let (cache, task) = task_over(json!({}), cancel.clone());
        task.start();
        cancel.cancel();
        let pred = task.process_prompt(request("sky", "blue")).await;
        assert_eq!(pred.status, PromptStatus::Cancelled);
        assert_eq!(task.processed_count(), 0);
        assert_eq!(cache.count().unwrap(), 0);
        assert_eq!(task.finish(), TaskStatus::Cancelled);
    }
}
