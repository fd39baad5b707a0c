//! Anthropic messages client.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::catalog::{slugify, EndpointSpec};
use crate::connectors::http::{check_status, send_error, CONNECTOR_PARAM_KEYS};
use crate::connectors::ModelClient;
use crate::errors::{CoreError, CoreResult};
use crate::model::PredictedResult;

const DEFAULT_URI: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
// The messages API requires max_tokens.
const DEFAULT_MAX_TOKENS: u64 = 1024;

pub struct AnthropicClient {
    connector_id: String,
    client: reqwest::Client,
    uri: String,
    token: String,
    model: String,
    temperature: Option<f64>,
    max_tokens: u64,
    extra: serde_json::Map<String, Value>,
}

impl AnthropicClient {
    pub fn from_spec(spec: &EndpointSpec) -> CoreResult<Self> {
        let mut extra = spec.params.clone();
        for key in CONNECTOR_PARAM_KEYS {
            extra.remove(*key);
        }
        let temperature = extra.remove("temperature").and_then(|v| v.as_f64());
        let max_tokens = extra
            .remove("max_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_TOKENS);
        Ok(Self {
            connector_id: if spec.id.is_empty() {
                slugify(&spec.name)
            } else {
                spec.id.clone()
            },
            client: reqwest::Client::new(),
            uri: if spec.uri.is_empty() {
                DEFAULT_URI.to_string()
            } else {
                spec.uri.clone()
            },
            token: spec.token.clone(),
            model: spec.model.clone(),
            temperature,
            max_tokens,
            extra,
        })
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn kind(&self) -> &'static str {
        "anthropic"
    }

    async fn get_response(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> CoreResult<PredictedResult> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(map) = body.as_object_mut() {
            if let Some(sp) = system_prompt {
                map.insert("system".to_string(), json!(sp));
            }
            if let Some(t) = self.temperature {
                map.insert("temperature".to_string(), json!(t));
            }
            for (k, v) in &self.extra {
                map.insert(k.clone(), v.clone());
            }
        }

        let response = self
            .client
            .post(&self.uri)
            .header("x-api-key", &self.token)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(&self.connector_id, e))?;
        let response = check_status(&self.connector_id, response).await?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| send_error(&self.connector_id, e))?;
        let text = payload
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Provider {
                connector_id: self.connector_id.clone(),
                status: None,
                message: "response missing /content/0/text".to_string(),
            })?;
        Ok(PredictedResult::text(text))
    }
}
