use async_trait::async_trait;
use serde_json::{Map, Value};

use gauntlet_core::errors::CoreResult;
use gauntlet_core::metrics_api::{value_text, Metric};
use gauntlet_core::model::PredictedResult;

use crate::accuracy_results;

/// Percentage of responses containing their target text. A list target
/// counts as a hit when any of its entries appears in the response.
pub struct ContainsMatch;

fn is_hit(response: &str, target: &Value) -> bool {
    match target {
        Value::Array(items) => items.iter().any(|t| response.contains(&value_text(t))),
        other => response.contains(&value_text(other)),
    }
}

#[async_trait]
impl Metric for ContainsMatch {
    fn id(&self) -> &str {
        "contains_match"
    }

    async fn get_results(
        &self,
        _prompts: &[String],
        predicted: &[PredictedResult],
        targets: &[Value],
    ) -> CoreResult<Map<String, Value>> {
        let correct = predicted
            .iter()
            .zip(targets)
            .filter(|(p, t)| is_hit(&p.response, t))
            .count();
        Ok(accuracy_results("contains_match", correct, predicted.len()))
    }
}
