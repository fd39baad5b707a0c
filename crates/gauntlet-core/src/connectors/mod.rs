//! Connectors: rate-limited, retrying clients for LLM endpoints.
//!
//! An [`EndpointSpec`] names a connector type; [`Connector::from_spec`]
//! resolves it to a [`ModelClient`] and wraps it with the endpoint's
//! concurrency/rate limits, retry policy and per-call timeout. Everything
//! above this module talks to [`Connector`] and never to a vendor client.

pub mod anthropic;
pub mod echo;
mod http;
pub mod limits;
pub mod openai;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::{slugify, EndpointSpec};
use crate::errors::{CoreError, CoreResult};
use crate::model::{PredictedResult, Prediction, PromptRequest};

pub use limits::RateLimiter;
pub use retry::RetryPolicy;

/// Default per-call timeout when the endpoint does not override it.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// A vendor-specific client. Implementations perform exactly one remote
/// call per invocation; limits, retries and timeouts live in [`Connector`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Connector type name this client answers to.
    fn kind(&self) -> &'static str;

    async fn get_response(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> CoreResult<PredictedResult>;
}

/// Connector types shipped with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    OpenAi,
    Anthropic,
    Echo,
}

impl ConnectorKind {
    pub fn parse(name: &str) -> CoreResult<Self> {
        match name {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "echo" => Ok(Self::Echo),
            other => Err(CoreError::UnknownConnector {
                connector_type: other.to_string(),
            }),
        }
    }

    fn build(self, spec: &EndpointSpec) -> CoreResult<Arc<dyn ModelClient>> {
        Ok(match self {
            Self::OpenAi => Arc::new(openai::OpenAiClient::from_spec(spec)?),
            Self::Anthropic => Arc::new(anthropic::AnthropicClient::from_spec(spec)?),
            Self::Echo => Arc::new(echo::EchoClient::from_spec(spec)?),
        })
    }
}

/// Invoked after each successful prediction with the prediction and the
/// connector id.
pub type PredictionCallback<'a> = dyn Fn(&Prediction, &str) + Send + Sync + 'a;

/// Runtime instance of one endpoint for the duration of one run.
pub struct Connector {
    id: String,
    model: String,
    client: Arc<dyn ModelClient>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    timeout: Duration,
    system_prompt: Option<String>,
    pre_prompt: String,
    post_prompt: String,
    cancel: CancellationToken,
}

impl Connector {
    /// Resolve the connector type and bind the endpoint's limits.
    pub fn from_spec(spec: &EndpointSpec) -> CoreResult<Self> {
        spec.validate()?;
        let client = ConnectorKind::parse(&spec.connector_type)?.build(spec)?;
        let id = if spec.id.is_empty() {
            slugify(&spec.name)
        } else {
            spec.id.clone()
        };
        let params = &spec.params;
        let timeout_secs = params
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let retry = RetryPolicy {
            allow_retries: params
                .get("allow_retries")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            retries_times: params
                .get("retries_times")
                .and_then(Value::as_u64)
                .unwrap_or(3) as u32,
        };
        Ok(Self {
            id,
            model: spec.model.clone(),
            client,
            limiter: RateLimiter::new(spec.max_concurrency, spec.max_calls_per_second),
            retry,
            timeout: Duration::from_secs(timeout_secs),
            system_prompt: None,
            pre_prompt: str_param(params, "pre_prompt"),
            post_prompt: str_param(params, "post_prompt"),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn connector_type(&self) -> &'static str {
        self.client.kind()
    }

    /// System prompt sent alongside every call of this run.
    pub fn set_system_prompt(&mut self, system_prompt: Option<String>) {
        self.system_prompt = system_prompt.filter(|s| !s.is_empty());
    }

    /// Share the run's cancel token. A caller already queued on the rate
    /// limiter when the token fires bails out before dispatching.
    pub fn bind_cancel(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    /// One rate-limited, retried, timed-out call. The composed prompt is
    /// `pre_prompt + prompt + post_prompt`; each retry attempt re-acquires
    /// a concurrency slot and a rate token.
    pub async fn get_response(&self, prompt: &str) -> CoreResult<PredictedResult> {
        let composed = format!("{}{}{}", self.pre_prompt, prompt, self.post_prompt);
        retry::with_retries(&self.retry, &self.id, || {
            let composed = composed.clone();
            async move {
                let permit = self.limiter.acquire().await?;
                if self.cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                let call = self.client.get_response(&composed, self.system_prompt.as_deref());
                let out = match tokio::time::timeout(self.timeout, call).await {
                    Ok(res) => res,
                    Err(_) => Err(CoreError::Timeout {
                        connector_id: self.id.clone(),
                        seconds: self.timeout.as_secs(),
                    }),
                };
                drop(permit);
                out
            }
        })
        .await
    }

    /// [`Connector::get_response`] plus bookkeeping: measures wall-clock
    /// duration, builds the [`Prediction`], and invokes the callback.
    pub async fn get_prediction(
        &self,
        request: PromptRequest,
        callback: Option<&PredictionCallback<'_>>,
    ) -> CoreResult<Prediction> {
        let started = std::time::Instant::now();
        let predicted = self.get_response(&request.prompt).await?;
        let duration = started.elapsed().as_secs_f64();

        let mut prediction = Prediction::from_request(request, self.id.clone());
        prediction.predicted_results = Some(predicted);
        prediction.duration = duration;
        debug!(connector = %self.id, duration_s = duration, "prediction complete");
        if let Some(cb) = callback {
            cb(&prediction, &self.id);
        }
        Ok(prediction)
    }
}

fn str_param(params: &serde_json::Map<String, Value>, key: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}
