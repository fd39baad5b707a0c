//! Shapes engine output into the persisted result document.
//!
//! The document is `{metadata, results}`. Recipe runs list recipes directly;
//! cookbook runs wrap the same recipe entries per cookbook and add an
//! overall per-model summary.

use std::path::Path;

use chrono::DateTime;
use serde::Serialize;
use serde_json::{json, Value};

use crate::catalog::GradingScale;
use crate::errors::CoreResult;
use crate::metrics_api::GRADING_CRITERIA_KEY;
use crate::model::RunStatus;
use crate::run::db::RunRecord;
use crate::run::engine::{BucketResult, CookbookRunResult, RecipeRunResult, RunResults};
use crate::storage::ObjectBackend;

/// Header block of the result document.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub id: String,
    pub start_time: String,
    pub end_time: String,
    /// Whole seconds.
    pub duration: i64,
    pub status: RunStatus,
    pub recipes: Vec<String>,
    pub cookbooks: Vec<String>,
    pub endpoints: Vec<String>,
    pub num_of_prompts: usize,
    pub prompt_selection_percentage: u8,
    pub random_seed: u64,
    pub system_prompt: String,
}

impl RunMetadata {
    pub fn from_record(record: &RunRecord, num_of_prompts: usize) -> Self {
        Self {
            id: record.runner_id.clone(),
            start_time: stamp(record.start_time),
            end_time: stamp(record.end_time),
            duration: record.duration,
            status: record.status,
            recipes: record.runner_args.recipes.clone(),
            cookbooks: record.runner_args.cookbooks.clone(),
            endpoints: record.endpoints.clone(),
            num_of_prompts,
            prompt_selection_percentage: record.runner_args.prompt_selection_percentage,
            random_seed: record.runner_args.random_seed,
            system_prompt: record.runner_args.system_prompt.clone(),
        }
    }
}

fn stamp(epoch: i64) -> String {
    DateTime::from_timestamp(epoch, 0)
        .map(|t| t.format("%Y%m%d-%H%M%S").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

/// Build the full result document.
pub fn render(metadata: &RunMetadata, results: &RunResults) -> Value {
    let body = match results {
        RunResults::Recipes(recipes) => json!({
            "recipes": recipes.iter().map(recipe_entry).collect::<Vec<_>>(),
        }),
        RunResults::Cookbooks(cookbooks) => json!({
            "cookbooks": cookbooks.iter().map(cookbook_entry).collect::<Vec<_>>(),
        }),
    };
    json!({
        "metadata": metadata,
        "results": body,
    })
}

/// Write `document` to `path` as pretty JSON.
pub fn write_document(path: &Path, document: &Value) -> CoreResult<()> {
    ObjectBackend::JsonEager.build().create(path, document)
}

fn recipe_entry(run: &RecipeRunResult) -> Value {
    let details: Vec<Value> = run
        .buckets
        .iter()
        .map(|bucket| {
            json!({
                "model_id": bucket.model_id,
                "dataset_id": bucket.dataset_id,
                "prompt_template_id": bucket.prompt_template_id,
                "data": bucket.data_entries(),
                "metrics": bucket.metrics,
            })
        })
        .collect();
    json!({
        "id": run.recipe.id,
        "grading_scale": run.recipe.grading_scale,
        "total_num_of_prompts": run.total_prompts,
        "details": details,
        "evaluation_summary": evaluation_summary(run),
    })
}

fn cookbook_entry(run: &CookbookRunResult) -> Value {
    let total: usize = run.recipes.iter().map(|r| r.total_prompts).sum();
    json!({
        "id": run.cookbook.id,
        "total_num_of_prompts": total,
        "recipes": run.recipes.iter().map(recipe_entry).collect::<Vec<_>>(),
        "overall_evaluation_summary": overall_summary(run),
    })
}

/// One summary row per model seen in the recipe's buckets, in first-seen
/// order.
fn evaluation_summary(run: &RecipeRunResult) -> Vec<Value> {
    let mut order: Vec<&str> = Vec::new();
    for bucket in &run.buckets {
        if !order.contains(&bucket.model_id.as_str()) {
            order.push(&bucket.model_id);
        }
    }
    order
        .into_iter()
        .map(|model_id| {
            let buckets: Vec<&BucketResult> = run
                .buckets
                .iter()
                .filter(|b| b.model_id == model_id)
                .collect();
            let num_of_prompts: usize = buckets.iter().map(|b| b.len()).sum();
            let avg = average_grade_value(&buckets);
            let grade = avg.and_then(|v| run.recipe.grading_scale.grade_for(v));
            json!({
                "model_id": model_id,
                "num_of_prompts": num_of_prompts,
                "avg_grade_value": avg,
                "grade": grade,
            })
        })
        .collect()
}

/// Mean of the per-bucket grading value. Any bucket missing the value voids
/// the whole average, which in turn voids the grade.
fn average_grade_value(buckets: &[&BucketResult]) -> Option<f64> {
    if buckets.is_empty() {
        return None;
    }
    let mut sum = 0.0;
    for bucket in buckets {
        sum += first_grading_value(bucket)?;
    }
    Some(sum / buckets.len() as f64)
}

/// First value of the first metric's `grading_criteria` mapping.
fn first_grading_value(bucket: &BucketResult) -> Option<f64> {
    bucket
        .metrics
        .first()?
        .get(GRADING_CRITERIA_KEY)?
        .as_object()?
        .values()
        .next()?
        .as_f64()
}

fn model_grade<'a>(run: &'a RecipeRunResult, model_id: &str) -> Option<&'a str> {
    let buckets: Vec<&BucketResult> = run
        .buckets
        .iter()
        .filter(|b| b.model_id == model_id)
        .collect();
    let avg = average_grade_value(&buckets)?;
    run.recipe.grading_scale.grade_for(avg)
}

/// Worst grade per model across the cookbook's recipes. Grades are only
/// comparable when every recipe uses the same ordered grading scale and
/// every recipe produced a grade on it; anything else shows "-".
fn overall_summary(run: &CookbookRunResult) -> Vec<Value> {
    let mut order: Vec<String> = Vec::new();
    for recipe in &run.recipes {
        for bucket in &recipe.buckets {
            if !order.contains(&bucket.model_id) {
                order.push(bucket.model_id.clone());
            }
        }
    }

    let shared = shared_scale(run);
    order
        .into_iter()
        .map(|model_id| {
            let grade = shared
                .as_ref()
                .and_then(|keys| worst_grade(run, &model_id, keys))
                .unwrap_or_else(|| "-".to_string());
            json!({ "model_id": model_id, "overall_grade": grade })
        })
        .collect()
}

/// The grading-scale key list all recipes agree on, if they do.
fn shared_scale(run: &CookbookRunResult) -> Option<Vec<String>> {
    let first = run.recipes.first()?;
    let keys = scale_keys(&first.recipe.grading_scale);
    run.recipes
        .iter()
        .all(|r| scale_keys(&r.recipe.grading_scale) == keys)
        .then_some(keys)
}

fn scale_keys(scale: &GradingScale) -> Vec<String> {
    scale.keys().into_iter().map(String::from).collect()
}

/// Highest-rank grade for `model_id` across recipes. `None` when any recipe
/// has no grade for the model.
fn worst_grade(run: &CookbookRunResult, model_id: &str, keys: &[String]) -> Option<String> {
    let mut worst = 0usize;
    for recipe in &run.recipes {
        let grade = model_grade(recipe, model_id)?;
        let rank = keys.iter().position(|k| k == grade)?;
        worst = worst.max(rank);
    }
    keys.get(worst).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Cookbook, Recipe};
    use crate::model::PredictedResult;
    use serde_json::Map;

    fn recipe(id: &str, scale: Value) -> Recipe {
        serde_json::from_value(json!({
            "id": id,
            "name": id,
            "datasets": ["d1"],
            "metrics": ["m"],
            "grading_scale": scale,
        }))
        .unwrap()
    }

    fn bucket(model: &str, dataset: &str, grading_value: Option<f64>) -> BucketResult {
        let mut metric = Map::new();
        if let Some(v) = grading_value {
            metric.insert("m".into(), json!(v));
            metric.insert(GRADING_CRITERIA_KEY.into(), json!({ "accuracy": v }));
        }
        BucketResult {
            model_id: model.into(),
            dataset_id: dataset.into(),
            prompt_template_id: "no-template".into(),
            prompts: vec!["q".into()],
            predicted: vec![PredictedResult::text("a")],
            targets: vec![json!("a")],
            durations: vec![0.5],
            metrics: vec![metric],
        }
    }

    fn run_result(id: &str, scale: Value, buckets: Vec<BucketResult>) -> RecipeRunResult {
        let total = buckets.iter().map(BucketResult::len).sum();
        RecipeRunResult {
            recipe: recipe(id, scale),
            total_prompts: total,
            buckets,
        }
    }

    fn ab_scale() -> Value {
        json!({"A": [80, 100], "B": [0, 79]})
    }

    #[test]
    fn recipe_summary_averages_buckets() {
        let run = run_result(
            "r1",
            ab_scale(),
            vec![
                bucket("m1", "d1", Some(80.0)),
                bucket("m1", "d2", Some(90.0)),
            ],
        );
        let out = render(
            &meta("completed"),
            &RunResults::Recipes(vec![run]),
        );
        let summary = out.pointer("/results/recipes/0/evaluation_summary/0").unwrap();
        assert_eq!(summary["model_id"], "m1");
        assert_eq!(summary["num_of_prompts"], 2);
        assert_eq!(summary["avg_grade_value"], json!(85.0));
        assert_eq!(summary["grade"], "A");

        let detail = out.pointer("/results/recipes/0/details/0").unwrap();
        assert_eq!(detail["dataset_id"], "d1");
        assert_eq!(detail["data"][0]["predicted_result"], "a");
        assert_eq!(detail["data"][0]["duration"], json!(0.5));
    }

    #[test]
    fn missing_grading_value_voids_the_grade() {
        let run = run_result(
            "r1",
            ab_scale(),
            vec![bucket("m1", "d1", Some(80.0)), bucket("m1", "d2", None)],
        );
        let out = render(&meta("completed"), &RunResults::Recipes(vec![run]));
        let summary = out.pointer("/results/recipes/0/evaluation_summary/0").unwrap();
        assert_eq!(summary["avg_grade_value"], Value::Null);
        assert_eq!(summary["grade"], Value::Null);
        // Prompt counts are reported even without a grade.
        assert_eq!(summary["num_of_prompts"], 2);
    }

    #[test]
    fn grade_band_uses_floored_average() {
        let run = run_result(
            "r1",
            ab_scale(),
            vec![
                bucket("m1", "d1", Some(79.0)),
                bucket("m1", "d2", Some(80.0)),
            ],
        );
        // avg 79.5 floors to 79: band B.
        let out = render(&meta("completed"), &RunResults::Recipes(vec![run]));
        let summary = out.pointer("/results/recipes/0/evaluation_summary/0").unwrap();
        assert_eq!(summary["grade"], "B");
    }

    fn cookbook(id: &str, recipes: Vec<RecipeRunResult>) -> CookbookRunResult {
        CookbookRunResult {
            cookbook: serde_json::from_value::<Cookbook>(json!({
                "id": id,
                "name": id,
                "recipes": recipes.iter().map(|r| r.recipe.id.clone()).collect::<Vec<_>>(),
            }))
            .unwrap(),
            recipes,
        }
    }

    #[test]
    fn cookbook_reports_worst_grade_per_model() {
        let cb = cookbook(
            "cb",
            vec![
                run_result("r1", ab_scale(), vec![bucket("m1", "d1", Some(95.0))]),
                run_result("r2", ab_scale(), vec![bucket("m1", "d1", Some(40.0))]),
            ],
        );
        let out = render(&meta("completed"), &RunResults::Cookbooks(vec![cb]));
        let entry = out.pointer("/results/cookbooks/0").unwrap();
        assert_eq!(entry["total_num_of_prompts"], 2);
        let overall = &entry["overall_evaluation_summary"][0];
        assert_eq!(overall["model_id"], "m1");
        assert_eq!(overall["overall_grade"], "B");
    }

    #[test]
    fn mismatched_scales_suppress_the_overall_grade() {
        let cb = cookbook(
            "cb",
            vec![
                run_result("r1", ab_scale(), vec![bucket("m1", "d1", Some(95.0))]),
                run_result(
                    "r2",
                    json!({"Pass": [50, 100], "Fail": [0, 49]}),
                    vec![bucket("m1", "d1", Some(95.0))],
                ),
            ],
        );
        let out = render(&meta("completed"), &RunResults::Cookbooks(vec![cb]));
        let overall = out
            .pointer("/results/cookbooks/0/overall_evaluation_summary/0")
            .unwrap();
        assert_eq!(overall["overall_grade"], "-");
    }

    #[test]
    fn gradeless_recipe_suppresses_the_overall_grade() {
        let cb = cookbook(
            "cb",
            vec![
                run_result("r1", ab_scale(), vec![bucket("m1", "d1", Some(95.0))]),
                run_result("r2", ab_scale(), vec![bucket("m1", "d1", None)]),
            ],
        );
        let out = render(&meta("completed"), &RunResults::Cookbooks(vec![cb]));
        let overall = out
            .pointer("/results/cookbooks/0/overall_evaluation_summary/0")
            .unwrap();
        assert_eq!(overall["overall_grade"], "-");
    }

    fn meta(status: &str) -> RunMetadata {
        RunMetadata {
            id: "bench".into(),
            start_time: "20240101-000000".into(),
            end_time: "20240101-000130".into(),
            duration: 90,
            status: RunStatus::parse(status).unwrap(),
            recipes: vec!["r1".into()],
            cookbooks: Vec::new(),
            endpoints: vec!["ep".into()],
            num_of_prompts: 2,
            prompt_selection_percentage: 100,
            random_seed: 0,
            system_prompt: String::new(),
        }
    }

    #[test]
    fn metadata_carries_run_parameters() {
        let out = render(&meta("completed_with_errors"), &RunResults::Recipes(Vec::new()));
        let m = &out["metadata"];
        assert_eq!(m["id"], "bench");
        assert_eq!(m["status"], "completed_with_errors");
        assert_eq!(m["prompt_selection_percentage"], 100);
        assert_eq!(m["num_of_prompts"], 2);
        assert_eq!(m["start_time"], "20240101-000000");
    }
}
