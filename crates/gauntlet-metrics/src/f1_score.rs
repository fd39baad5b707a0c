use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use gauntlet_core::errors::CoreResult;
use gauntlet_core::metrics_api::{value_text, Metric, GRADING_CRITERIA_KEY};
use gauntlet_core::model::PredictedResult;

use crate::round2;

/// Mean token-level F1 between response and target, scaled to 0..=100.
///
/// Tokens are lowercased whitespace words; overlap is counted as a
/// multiset so repeated words are not over-credited.
pub struct F1Score;

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect()
}

fn pair_f1(response: &str, target: &str) -> f64 {
    let r = tokens(response);
    let t = tokens(target);
    if r.is_empty() && t.is_empty() {
        return 1.0;
    }
    if r.is_empty() || t.is_empty() {
        return 0.0;
    }
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for tok in &t {
        *remaining.entry(tok.as_str()).or_default() += 1;
    }
    let mut overlap = 0usize;
    for tok in &r {
        if let Some(count) = remaining.get_mut(tok.as_str()) {
            if *count > 0 {
                *count -= 1;
                overlap += 1;
            }
        }
    }
    if overlap == 0 {
        return 0.0;
    }
    let precision = overlap as f64 / r.len() as f64;
    let recall = overlap as f64 / t.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

#[async_trait]
impl Metric for F1Score {
    fn id(&self) -> &str {
        "f1_score"
    }

    async fn get_results(
        &self,
        _prompts: &[String],
        predicted: &[PredictedResult],
        targets: &[Value],
    ) -> CoreResult<Map<String, Value>> {
        let score = if predicted.is_empty() {
            0.0
        } else {
            let sum: f64 = predicted
                .iter()
                .zip(targets)
                .map(|(p, t)| pair_f1(&p.response, &value_text(t)))
                .sum();
            round2(sum * 100.0 / predicted.len() as f64)
        };
        let mut out = Map::new();
        out.insert("f1_score".into(), json!(score));
        out.insert(GRADING_CRITERIA_KEY.into(), json!({ "f1_score": score }));
        Ok(out)
    }
}
