use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use gauntlet_core::errors::{CoreError, CoreResult};
use gauntlet_core::metrics_api::{value_text, Metric};
use gauntlet_core::model::PredictedResult;

use crate::accuracy_results;

/// Percentage of responses matched by the regular expression carried in
/// their target. An invalid pattern fails the whole evaluation.
pub struct RegexMatch;

#[async_trait]
impl Metric for RegexMatch {
    fn id(&self) -> &str {
        "regex_match"
    }

    async fn get_results(
        &self,
        _prompts: &[String],
        predicted: &[PredictedResult],
        targets: &[Value],
    ) -> CoreResult<Map<String, Value>> {
        let mut correct = 0usize;
        for (p, t) in predicted.iter().zip(targets) {
            let pattern = value_text(t);
            let re = Regex::new(&pattern).map_err(|e| CoreError::Metric {
                metric_id: "regex_match".into(),
                message: format!("invalid pattern {pattern:?}: {e}"),
            })?;
            if re.is_match(&p.response) {
                correct += 1;
            }
        }
        Ok(accuracy_results("regex_match", correct, predicted.len()))
    }
}
