//! Endpoint records: everything needed to reach one model behind one vendor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{CoreError, CoreResult};

/// A configured LLM endpoint.
///
/// `params` is free-form and interpreted by the connector type (temperature,
/// candidate counts, scripted test responses, and so on).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub connector_type: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub token: String,
    pub max_calls_per_second: u32,
    pub max_concurrency: u32,
    pub model: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    #[serde(default)]
    pub created_date: String,
}

impl EndpointSpec {
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("endpoint name is empty"));
        }
        if self.connector_type.trim().is_empty() {
            return Err(CoreError::validation(format!(
                "endpoint {} has no connector_type",
                self.name
            )));
        }
        if self.max_calls_per_second == 0 {
            return Err(CoreError::validation(format!(
                "endpoint {}: max_calls_per_second must be > 0",
                self.name
            )));
        }
        if self.max_concurrency == 0 {
            return Err(CoreError::validation(format!(
                "endpoint {}: max_concurrency must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}
