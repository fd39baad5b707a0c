use std::sync::Arc;

use gauntlet_core::metrics_api::{Metric, MetricRegistry, GRADING_CRITERIA_KEY};
use serde_json::{json, Map, Value};

mod contains_match;
mod exact_str_match;
mod f1_score;
mod regex_match;

/// Every metric this crate ships.
pub fn default_metrics() -> Vec<Arc<dyn Metric>> {
    vec![
        Arc::new(exact_str_match::ExactStrMatch),
        Arc::new(contains_match::ContainsMatch),
        Arc::new(regex_match::RegexMatch),
        Arc::new(f1_score::F1Score),
    ]
}

/// Registry pre-loaded with the built-in metrics.
pub fn builtin_registry() -> MetricRegistry {
    let mut registry = MetricRegistry::new();
    for metric in default_metrics() {
        registry.register(metric);
    }
    registry
}

/// Standard shape for hit-counting metrics: headline percentage under the
/// metric's own id, raw counts, and an `accuracy` grading criterion.
pub(crate) fn accuracy_results(id: &str, correct: usize, total: usize) -> Map<String, Value> {
    let accuracy = if total == 0 {
        0.0
    } else {
        round2(correct as f64 * 100.0 / total as f64)
    };
    let mut out = Map::new();
    out.insert(id.to_string(), json!(accuracy));
    out.insert("correct".into(), json!(correct));
    out.insert("total".into(), json!(total));
    out.insert(GRADING_CRITERIA_KEY.into(), json!({ "accuracy": accuracy }));
    out
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_carries_all_builtins() {
        let registry = builtin_registry();
        assert_eq!(
            registry.ids(),
            vec!["contains_match", "exact_str_match", "f1_score", "regex_match"]
        );
    }

    #[test]
    fn accuracy_shape() {
        let out = accuracy_results("m", 2, 3);
        assert_eq!(out["m"], json!(66.67));
        assert_eq!(out["correct"], json!(2));
        assert_eq!(out["total"], json!(3));
        assert_eq!(out[GRADING_CRITERIA_KEY], json!({ "accuracy": 66.67 }));
        assert_eq!(accuracy_results("m", 0, 0)["m"], json!(0.0));
    }
}
