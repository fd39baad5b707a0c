use async_trait::async_trait;
use serde_json::{Map, Value};

use gauntlet_core::errors::CoreResult;
use gauntlet_core::metrics_api::{value_text, Metric};
use gauntlet_core::model::PredictedResult;

use crate::accuracy_results;

/// Percentage of responses exactly equal to their target text.
pub struct ExactStrMatch;

#[async_trait]
impl Metric for ExactStrMatch {
    fn id(&self) -> &str {
        "exact_str_match"
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
            .filter(|(p, t)| p.response == value_text(t))
            .count();
        Ok(accuracy_results("exact_str_match", correct, predicted.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn preds(texts: &[&str]) -> Vec<PredictedResult> {
        texts.iter().map(|t| PredictedResult::text(*t)).collect()
    }

    #[tokio::test]
    async fn counts_exact_matches_only() -> anyhow::Result<()> {
        let out = ExactStrMatch
            .get_results(
                &[],
                &preds(&["paris", "PARIS", "rome"]),
                &[json!("paris"), json!("paris"), json!("rome")],
            )
            .await?;
        assert_eq!(out["exact_str_match"], json!(66.67));
        assert_eq!(out["correct"], json!(2));
        Ok(())
    }

    #[tokio::test]
    async fn non_string_targets_compare_as_compact_json() -> anyhow::Result<()> {
        let out = ExactStrMatch
            .get_results(&[], &preds(&["[1,2]"]), &[json!([1, 2])])
            .await?;
        assert_eq!(out["correct"], json!(1));
        Ok(())
    }
}
