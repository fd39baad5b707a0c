//! Offline connector that answers from its own params.
//!
//! Used for smoke tests and demo catalogs: no network, deterministic output.
//! Params:
//! - `responses`: map of exact prompt text to reply
//! - `response`: fixed reply for any prompt not in `responses`
//! - `context`: strings attached to every reply's context
//! - `errors`: map of exact prompt text to a simulated provider error
//! - `error_status`: HTTP-like status for simulated errors (default 400)
//!
//! Falls back to echoing the prompt itself.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::{slugify, EndpointSpec};
use crate::connectors::ModelClient;
use crate::errors::{CoreError, CoreResult};
use crate::model::PredictedResult;

pub struct EchoClient {
    connector_id: String,
    responses: HashMap<String, String>,
    fixed_response: Option<String>,
    context: Vec<String>,
    errors: HashMap<String, String>,
    error_status: u16,
}

impl EchoClient {
    pub fn from_spec(spec: &EndpointSpec) -> CoreResult<Self> {
        let string_map = |key: &str| -> HashMap<String, String> {
            spec.params
                .get(key)
                .and_then(Value::as_object)
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(Self {
            connector_id: if spec.id.is_empty() {
                slugify(&spec.name)
            } else {
                spec.id.clone()
            },
            responses: string_map("responses"),
            fixed_response: spec
                .params
                .get("response")
                .and_then(Value::as_str)
                .map(String::from),
            context: spec
                .params
                .get("context")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            errors: string_map("errors"),
            error_status: spec
                .params
                .get("error_status")
                .and_then(Value::as_u64)
                .unwrap_or(400) as u16,
        })
    }
}

#[async_trait]
impl ModelClient for EchoClient {
    fn kind(&self) -> &'static str {
        "echo"
    }

    async fn get_response(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> CoreResult<PredictedResult> {
        if let Some(message) = self.errors.get(prompt) {
            return Err(CoreError::Provider {
                connector_id: self.connector_id.clone(),
                status: Some(self.error_status),
                message: message.clone(),
            });
        }
        let response = self
            .responses
            .get(prompt)
            .cloned()
            .or_else(|| self.fixed_response.clone())
            .unwrap_or_else(|| prompt.to_string());
        let mut context = self.context.clone();
        if let Some(sp) = system_prompt {
            context.push(format!("system: {sp}"));
        }
        Ok(PredictedResult { response, context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(params: Value) -> EndpointSpec {
        serde_json::from_value(json!({
            "name": "Echo",
            "connector_type": "echo",
            "max_calls_per_second": 100,
            "max_concurrency": 4,
            "model": "echo-1",
            "params": params,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn scripted_then_fixed_then_echo() -> anyhow::Result<()> {
        let client = EchoClient::from_spec(&spec(json!({
            "responses": {"ping": "pong"},
            "response": "dunno",
        })))?;
        assert_eq!(client.get_response("ping", None).await?.response, "pong");
        assert_eq!(client.get_response("other", None).await?.response, "dunno");

        let bare = EchoClient::from_spec(&spec(json!({})))?;
        assert_eq!(bare.get_response("raw", None).await?.response, "raw");
        Ok(())
    }

    #[tokio::test]
    async fn system_prompt_lands_in_context() -> anyhow::Result<()> {
        let client = EchoClient::from_spec(&spec(json!({"context": ["doc1"]})))?;
        let out = client.get_response("q", Some("be terse")).await?;
        assert_eq!(out.context, vec!["doc1".to_string(), "system: be terse".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn scripted_errors_surface_as_provider_errors() -> anyhow::Result<()> {
        let client = EchoClient::from_spec(&spec(json!({
            "errors": {"boom": "synthetic failure"},
            "error_status": 500,
        })))?;
        let err = client.get_response("boom", None).await.unwrap_err();
        match err {
            CoreError::Provider { status, message, .. } => {
                assert_eq!(status, Some(500));
                assert_eq!(message, "synthetic failure");
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }
}
