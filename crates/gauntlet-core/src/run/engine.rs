//! The run engine: executes cookbooks and recipes against endpoints.
//!
//! A run moves through fixed phases: preflight (database, connectors, run
//! row), execution (prompt pipeline per recipe), grouping, metrics
//! aggregation, result writing, finalize. Failures inside a phase degrade to
//! recorded errors wherever the run can still produce a useful result
//! document; only failures before the run row exists surface as `Err`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::{CatalogStore, Cookbook, Recipe, RunnerRecord};
use crate::connectors::{Connector, PredictionCallback};
use crate::errors::CoreResult;
use crate::metrics_api::{Metric, MetricRegistry};
use crate::model::{PredictedResult, RunStatus, RunnerArgs, RunnerType};
use crate::run::cache::PredictionCache;
use crate::run::db::{RunDb, RunRecord};
use crate::run::format;
use crate::run::progress::{ProgressSink, RunProgress};
use crate::run::prompts::{RecipePrompts, NO_TEMPLATE_ID};
use crate::run::task::{TaskProcessor, TaskSetup};

/// Tuning knobs for the prompt pipeline.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Prompts per producer batch.
    pub batch_size: usize,
    /// Batches the queue holds before the producer blocks.
    pub queue_depth: usize,
    /// Prompts in flight at once per task.
    pub task_concurrency_limit: usize,
    /// Consult the prediction cache before calling connectors.
    pub use_cache: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            queue_depth: 10,
            task_concurrency_limit: 5,
            use_cache: true,
        }
    }
}

/// What a finished run hands back to the caller.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: i64,
    pub status: RunStatus,
    pub results_file: PathBuf,
    /// The formatted result document, as written to `results_file`.
    pub results: Value,
    pub error_messages: Vec<String>,
}

/// One (connector, dataset, prompt template) bucket with its parallel lists
/// and aggregated metric outputs.
#[derive(Debug, Clone)]
pub struct BucketResult {
    pub model_id: String,
    pub dataset_id: String,
    pub prompt_template_id: String,
    pub prompts: Vec<String>,
    pub predicted: Vec<PredictedResult>,
    pub targets: Vec<Value>,
    pub durations: Vec<f64>,
    /// One entry per recipe metric, in recipe order, verbatim.
    pub metrics: Vec<Map<String, Value>>,
}

impl BucketResult {
    fn new(model_id: String, dataset_id: String, prompt_template_id: String) -> Self {
        Self {
            model_id,
            dataset_id,
            prompt_template_id,
            prompts: Vec::new(),
            predicted: Vec::new(),
            targets: Vec::new(),
            durations: Vec::new(),
            metrics: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Per-prompt records in the shape the result document uses.
    pub fn data_entries(&self) -> Vec<Value> {
        self.prompts
            .iter()
            .zip(&self.predicted)
            .zip(&self.targets)
            .zip(&self.durations)
            .map(|(((prompt, predicted), target), duration)| {
                json!({
                    "prompt": prompt,
                    "predicted_result": predicted.response,
                    "target": target,
                    "duration": duration,
                })
            })
            .collect()
    }
}

/// All buckets of one executed recipe.
#[derive(Debug, Clone)]
pub struct RecipeRunResult {
    pub recipe: Recipe,
    pub total_prompts: usize,
    pub buckets: Vec<BucketResult>,
}

/// One executed cookbook.
#[derive(Debug, Clone)]
pub struct CookbookRunResult {
    pub cookbook: Cookbook,
    pub recipes: Vec<RecipeRunResult>,
}

/// Execution output, shaped after what was asked to run.
#[derive(Debug, Clone)]
pub enum RunResults {
    Recipes(Vec<RecipeRunResult>),
    Cookbooks(Vec<CookbookRunResult>),
}

impl RunResults {
    pub fn total_prompts(&self) -> usize {
        match self {
            Self::Recipes(recipes) => recipes.iter().map(|r| r.total_prompts).sum(),
            Self::Cookbooks(cookbooks) => cookbooks
                .iter()
                .flat_map(|c| &c.recipes)
                .map(|r| r.total_prompts)
                .sum(),
        }
    }

    /// Raw nested view persisted in the run row:
    /// cookbook -> recipe -> bucket key -> {data, results}.
    pub fn raw(&self) -> Value {
        fn recipe_raw(recipe: &RecipeRunResult) -> Value {
            let mut buckets = Map::new();
            for bucket in &recipe.buckets {
                let key = format!(
                    "{}|{}|{}",
                    bucket.model_id, bucket.dataset_id, bucket.prompt_template_id
                );
                buckets.insert(
                    key,
                    json!({
                        "data": bucket.data_entries(),
                        "results": bucket.metrics,
                    }),
                );
            }
            Value::Object(buckets)
        }

        match self {
            Self::Recipes(recipes) => {
                let mut out = Map::new();
                for recipe in recipes {
                    out.insert(recipe.recipe.id.clone(), recipe_raw(recipe));
                }
                json!({ "recipes": out })
            }
            Self::Cookbooks(cookbooks) => {
                let mut out = Map::new();
                for cookbook in cookbooks {
                    let mut recipes = Map::new();
                    for recipe in &cookbook.recipes {
                        recipes.insert(recipe.recipe.id.clone(), recipe_raw(recipe));
                    }
                    out.insert(cookbook.cookbook.id.clone(), Value::Object(recipes));
                }
                json!({ "cookbooks": out })
            }
        }
    }
}

/// Executes runs against a catalog with a set of registered metrics.
pub struct RunEngine {
    catalog: Arc<CatalogStore>,
    metrics: Arc<MetricRegistry>,
    config: EngineConfig,
}

impl RunEngine {
    pub fn new(catalog: Arc<CatalogStore>, metrics: Arc<MetricRegistry>) -> Self {
        Self::with_config(catalog, metrics, EngineConfig::default())
    }

    pub fn with_config(
        catalog: Arc<CatalogStore>,
        metrics: Arc<MetricRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            metrics,
            config,
        }
    }

    /// Execute `args` under `runner`, reporting progress to `sink` and each
    /// fresh prediction to `callback`.
    pub async fn run(
        &self,
        runner: &RunnerRecord,
        args: RunnerArgs,
        cancel: CancellationToken,
        sink: Option<Arc<dyn ProgressSink>>,
        callback: Option<Arc<PredictionCallback<'static>>>,
    ) -> CoreResult<RunOutcome> {
        let preflight = Instant::now();
        let cfg = self.catalog.config();
        let db_path = if runner.database_file.is_empty() {
            cfg.database_path(&runner.id)
        } else {
            PathBuf::from(&runner.database_file)
        };
        let results_path = cfg.results_path(&runner.id);

        let db = Arc::new(RunDb::open(&db_path)?);
        let selection = args.selection();
        let runner_type = *selection.as_ref().unwrap_or(&RunnerType::Recipe);
        let record = RunRecord::started(
            &runner.id,
            runner_type,
            args.clone(),
            runner.endpoints.clone(),
            results_path.display().to_string(),
        );
        let run_id = db.create_run(&record)?;
        let mut progress = RunProgress::new(Arc::clone(&db), run_id, record, sink, 0, 0);

        // From here on every failure is recorded in the run row; the run
        // always reaches finalize and always writes a result document.
        let mut abort = false;
        if let Err(e) = args.validate() {
            progress.record_error(e.to_string());
            abort = true;
        }
        if let Err(e) = &selection {
            progress.record_error(e.to_string());
            abort = true;
        }

        let mut connectors: Vec<Arc<Connector>> = Vec::new();
        if !abort {
            if runner.endpoints.is_empty() {
                progress.record_error("runner has no endpoints");
                abort = true;
            }
            for endpoint_id in &runner.endpoints {
                match self
                    .catalog
                    .endpoint(endpoint_id)
                    .and_then(|spec| Connector::from_spec(&spec))
                {
                    Ok(mut connector) => {
                        connector.set_system_prompt(Some(args.system_prompt.clone()));
                        connector.bind_cancel(cancel.clone());
                        connectors.push(Arc::new(connector));
                    }
                    Err(e) => {
                        progress.record_error(format!("endpoint {endpoint_id}: {e}"));
                        abort = true;
                    }
                }
            }
        }
        let cache = Arc::new(PredictionCache::new(
            db.backend(),
            args.random_seed,
            args.system_prompt.clone(),
        ));
        info!(
            run_id,
            runner = %runner.id,
            connectors = connectors.len(),
            elapsed_ms = preflight.elapsed().as_millis() as u64,
            "preflight complete"
        );

        let execution = Instant::now();
        if !abort {
            progress.set_status(RunStatus::Running);
        }
        let results = if abort {
            match runner_type {
                RunnerType::Recipe => RunResults::Recipes(Vec::new()),
                RunnerType::Cookbook => RunResults::Cookbooks(Vec::new()),
            }
        } else {
            match runner_type {
                RunnerType::Recipe => {
                    progress.set_totals(0, args.recipes.len());
                    let mut recipes = Vec::new();
                    for (index, recipe_id) in args.recipes.iter().enumerate() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        progress.advance_recipe(index, Some(recipe_id.clone()));
                        match self
                            .run_recipe(recipe_id, &args, &connectors, &cache, &cancel, &callback, &mut progress)
                            .await
                        {
                            Ok(result) => recipes.push(result),
                            Err(e) => progress.record_error(format!("recipe {recipe_id}: {e}")),
                        }
                    }
                    if !cancel.is_cancelled() {
                        progress.advance_recipe(args.recipes.len(), None);
                    }
                    RunResults::Recipes(recipes)
                }
                RunnerType::Cookbook => {
                    progress.set_totals(args.cookbooks.len(), 0);
                    let mut cookbooks = Vec::new();
                    for (cb_index, cookbook_id) in args.cookbooks.iter().enumerate() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let cookbook = match self.catalog.cookbook(cookbook_id) {
                            Ok(cookbook) => cookbook,
                            Err(e) => {
                                progress.record_error(format!("cookbook {cookbook_id}: {e}"));
                                continue;
                            }
                        };
                        progress.advance_cookbook(
                            cb_index,
                            Some(cookbook.id.clone()),
                            cookbook.recipes.len(),
                        );
                        let mut recipes = Vec::new();
                        for (index, recipe_id) in cookbook.recipes.iter().enumerate() {
                            if cancel.is_cancelled() {
                                break;
                            }
                            progress.advance_recipe(index, Some(recipe_id.clone()));
                            match self
                                .run_recipe(recipe_id, &args, &connectors, &cache, &cancel, &callback, &mut progress)
                                .await
                            {
                                Ok(result) => recipes.push(result),
                                Err(e) => {
                                    progress.record_error(format!("recipe {recipe_id}: {e}"));
                                }
                            }
                        }
                        if !cancel.is_cancelled() {
                            progress.advance_recipe(cookbook.recipes.len(), None);
                        }
                        cookbooks.push(CookbookRunResult { cookbook, recipes });
                        if !cancel.is_cancelled() {
                            progress.advance_cookbook(cb_index + 1, None, 0);
                        }
                    }
                    RunResults::Cookbooks(cookbooks)
                }
            }
        };
        info!(
            run_id,
            elapsed_ms = execution.elapsed().as_millis() as u64,
            prompts = results.total_prompts(),
            "execution complete"
        );

        // Finalize: terminal status first, then the result document so its
        // metadata reflects the final state.
        let terminal = if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        progress.set_status(terminal);

        let formatting = Instant::now();
        let metadata = format::RunMetadata::from_record(progress.record(), results.total_prompts());
        let formatted = format::render(&metadata, &results);
        progress.set_results(results.raw(), formatted.clone());
        if let Err(e) = format::write_document(&results_path, &formatted) {
            progress.record_error(format!("results file: {e}"));
        }
        info!(
            run_id,
            elapsed_ms = formatting.elapsed().as_millis() as u64,
            file = %results_path.display(),
            status = progress.status().as_str(),
            "run finalized"
        );

        let record = progress.into_record();
        Ok(RunOutcome {
            run_id,
            status: record.status,
            results_file: results_path,
            results: formatted,
            error_messages: record.error_messages,
        })
    }

    /// Execute one recipe end to end: prompt pipeline, grouping, metric
    /// aggregation. Prompt-level failures are recorded and survive; an `Err`
    /// means the recipe produced nothing usable.
    #[allow(clippy::too_many_arguments)]
    async fn run_recipe(
        &self,
        recipe_id: &str,
        args: &RunnerArgs,
        connectors: &[Arc<Connector>],
        cache: &Arc<PredictionCache>,
        cancel: &CancellationToken,
        callback: &Option<Arc<PredictionCallback<'static>>>,
        progress: &mut RunProgress,
    ) -> CoreResult<RecipeRunResult> {
        let started = Instant::now();
        let recipe = self.catalog.recipe(recipe_id)?;
        let metric_set = self.metrics.resolve_all(&recipe.metrics)?;
        let prompts = RecipePrompts::prepare(&self.catalog, &recipe, args)?;
        let total = prompts.total();

        let template_ids: Vec<String> = if recipe.prompt_templates.is_empty() {
            vec![NO_TEMPLATE_ID.to_string()]
        } else {
            recipe.prompt_templates.clone()
        };
        let mut tasks: HashMap<(String, String), Arc<TaskProcessor>> = HashMap::new();
        for connector in connectors {
            for template_id in &template_ids {
                let task = TaskSetup {
                    connector: Arc::clone(connector),
                    recipe_id: recipe.id.clone(),
                    prompt_template_id: template_id.clone(),
                    metrics: metric_set.clone(),
                    cache: Arc::clone(cache),
                    use_cache: self.config.use_cache,
                    cancel: cancel.clone(),
                    callback: callback.clone(),
                    concurrency_limit: self.config.task_concurrency_limit,
                }
                .build();
                task.start();
                tasks.insert(
                    (connector.id().to_string(), template_id.clone()),
                    Arc::new(task),
                );
            }
        }

        // Each batch fans out to every connector; the whole batch settles
        // before the next one is pulled, which bounds in-flight work.
        let mut predictions = Vec::with_capacity(total * connectors.len());
        let mut stream = prompts.spawn(cancel.clone(), self.config.batch_size, self.config.queue_depth);
        while let Some(batch) = stream.next_batch().await {
            if cancel.is_cancelled() {
                break;
            }
            let mut subtasks: JoinSet<crate::model::Prediction> = JoinSet::new();
            for request in batch {
                for connector in connectors {
                    let key = (
                        connector.id().to_string(),
                        request.prompt_template_id.clone(),
                    );
                    let Some(task) = tasks.get(&key) else {
                        progress.record_error(format!(
                            "no task for connector {} and template {}",
                            key.0, key.1
                        ));
                        continue;
                    };
                    let task = Arc::clone(task);
                    let request = request.clone();
                    subtasks.spawn(async move { task.process_prompt(request).await });
                }
            }
            while let Some(joined) = subtasks.join_next().await {
                match joined {
                    Ok(prediction) => predictions.push(prediction),
                    Err(e) => progress.record_error(format!("prompt subtask failed: {e}")),
                }
            }
        }
        stream.finish().await?;

        for task in tasks.values() {
            task.finish();
        }
        for prediction in &predictions {
            for message in &prediction.error_messages {
                progress.record_error(message.clone());
            }
        }

        // Deterministic grouping regardless of completion order.
        predictions.sort_by(|a, b| {
            (
                &a.connection_id,
                &a.recipe_id,
                &a.dataset_id,
                &a.prompt_template_id,
                a.prompt_index,
            )
                .cmp(&(
                    &b.connection_id,
                    &b.recipe_id,
                    &b.dataset_id,
                    &b.prompt_template_id,
                    b.prompt_index,
                ))
        });
        let mut buckets: Vec<BucketResult> = Vec::new();
        for prediction in predictions {
            let Some(predicted) = prediction.predicted_results else {
                continue;
            };
            let same_bucket = buckets.last().is_some_and(|b| {
                b.model_id == prediction.connection_id
                    && b.dataset_id == prediction.dataset_id
                    && b.prompt_template_id == prediction.prompt_template_id
            });
            if !same_bucket {
                buckets.push(BucketResult::new(
                    prediction.connection_id.clone(),
                    prediction.dataset_id.clone(),
                    prediction.prompt_template_id.clone(),
                ));
            }
            let bucket = buckets.last_mut().unwrap();
            bucket.prompts.push(prediction.prompt);
            bucket.predicted.push(predicted);
            bucket.targets.push(prediction.target);
            bucket.durations.push(prediction.duration);
        }

        for bucket in &mut buckets {
            for metric in &metric_set {
                match metric
                    .get_results(&bucket.prompts, &bucket.predicted, &bucket.targets)
                    .await
                {
                    Ok(results) => bucket.metrics.push(results),
                    Err(e) => {
                        progress.record_error(format!("metric {}: {e}", metric.id()));
                        bucket.metrics.push(Map::new());
                    }
                }
            }
            debug!(
                recipe = %recipe.id,
                model = %bucket.model_id,
                dataset = %bucket.dataset_id,
                template = %bucket.prompt_template_id,
                prompts = bucket.len(),
                "bucket aggregated"
            );
        }

        info!(
            recipe = %recipe.id,
            prompts = total,
            buckets = buckets.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "recipe complete"
        );
        Ok(RecipeRunResult {
            recipe,
            total_prompts: total,
            buckets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DatasetExample, DatasetMeta};
    use crate::config::EnvConfig;
    use crate::errors::CoreResult;
    use crate::metrics_api::GRADING_CRITERIA_KEY;
    use async_trait::async_trait;
    use serde_json::json;

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
        ) -> CoreResult<Map<String, Value>> {
            let hits = predicted
                .iter()
                .zip(targets)
                .filter(|(p, t)| Some(p.response.as_str()) == t.as_str())
                .count();
            let accuracy = hits as f64 * 100.0 / predicted.len().max(1) as f64;
            let mut out = Map::new();
            out.insert("match_target".into(), json!(accuracy));
            out.insert(GRADING_CRITERIA_KEY.into(), json!({ "accuracy": accuracy }));
            Ok(out)
        }
    }

    fn engine_fixture() -> (tempfile::TempDir, RunEngine, RunnerRecord) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EnvConfig::with_root(dir.path());
        cfg.ensure_dirs().unwrap();
        let store = Arc::new(CatalogStore::new(cfg));

        let examples: Vec<DatasetExample> = (0..4)
            .map(|i| DatasetExample {
                input: format!("q{i}"),
                target: json!(format!("a{i}")),
            })
            .collect();
        store
            .create_dataset(
                &DatasetMeta {
                    name: "Trivia".into(),
                    ..Default::default()
                },
                &examples,
            )
            .unwrap();
        store
            .create_recipe(
                &serde_json::from_value(json!({
                    "name": "Trivia Run",
                    "datasets": ["trivia"],
                    "metrics": ["match_target"],
                    "grading_scale": {"A": [80, 100], "B": [0, 79]},
                }))
                .unwrap(),
            )
            .unwrap();
        store
            .create_endpoint(
                &serde_json::from_value(json!({
                    "name": "Echo",
                    "connector_type": "echo",
                    "max_calls_per_second": 100,
                    "max_concurrency": 4,
                    "model": "echo-1",
                    "params": {
                        "responses": {"q0": "a0", "q1": "a1", "q2": "a2", "q3": "wrong"}
                    },
                }))
                .unwrap(),
            )
            .unwrap();

        let mut registry = MetricRegistry::new();
        registry.register(Arc::new(MatchTarget));
        let engine = RunEngine::new(Arc::clone(&store), Arc::new(registry));
        let runner = RunnerRecord {
            id: "bench".into(),
            name: "Bench".into(),
            description: String::new(),
            database_file: String::new(),
            endpoints: vec!["echo".into()],
            created_date: String::new(),
        };
        (dir, engine, runner)
    }

    fn recipe_args() -> RunnerArgs {
        RunnerArgs {
            recipes: vec!["trivia-run".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn recipe_run_completes_and_writes_results() -> anyhow::Result<()> {
        let (_dir, engine, runner) = engine_fixture();
        let outcome = engine
            .run(
                &runner,
                recipe_args(),
                CancellationToken::new(),
                None,
                None,
            )
            .await?;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.error_messages.is_empty());
        assert!(outcome.results_file.exists());

        // 3 of 4 answers match: 75 lands in the B band.
        let summary = outcome
            .results
            .pointer("/results/recipes/0/evaluation_summary/0")
            .unwrap();
        assert_eq!(summary["model_id"], "echo");
        assert_eq!(summary["avg_grade_value"], json!(75.0));
        assert_eq!(summary["grade"], "B");

        let db = RunDb::open(&engine.catalog.config().database_path(&runner.id))?;
        let stored = db.latest_run()?.unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(PredictionCache::new(db.backend(), 0, "").count()?, 4);
        Ok(())
    }

    #[tokio::test]
    async fn pre_cancelled_run_is_marked_cancelled() -> anyhow::Result<()> {
        let (_dir, engine, runner) = engine_fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = engine.run(&runner, recipe_args(), cancel, None, None).await?;
        assert_eq!(outcome.status, RunStatus::Cancelled);
        // The result document is written even for a cancelled run.
        assert!(outcome.results_file.exists());
        Ok(())
    }

    #[tokio::test]
    async fn missing_endpoint_finishes_with_errors() -> anyhow::Result<()> {
        let (_dir, engine, mut runner) = engine_fixture();
        runner.endpoints = vec!["ghost".into()];
        let outcome = engine
            .run(
                &runner,
                recipe_args(),
                CancellationToken::new(),
                None,
                None,
            )
            .await?;
        assert_eq!(outcome.status, RunStatus::CompletedWithErrors);
        assert!(outcome.error_messages[0].contains("ghost"));
        assert!(outcome.results_file.exists());
        Ok(())
    }

    #[tokio::test]
    async fn ambiguous_selection_is_recorded_not_thrown() -> anyhow::Result<()> {
        let (_dir, engine, runner) = engine_fixture();
        let args = RunnerArgs {
            recipes: vec!["trivia-run".into()],
            cookbooks: vec!["cb".into()],
            ..Default::default()
        };
        let outcome = engine
            .run(&runner, args, CancellationToken::new(), None, None)
            .await?;
        assert_eq!(outcome.status, RunStatus::CompletedWithErrors);
        assert!(outcome.error_messages[0].contains("ambiguous"));
        Ok(())
    }
}
