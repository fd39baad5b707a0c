//! Shared HTTP plumbing for vendor clients. Status-code interpretation
//! happens here and nowhere else.

use std::time::Duration;

use crate::errors::{CoreError, CoreResult};

/// Endpoint params consumed by the [`super::Connector`] wrapper itself;
/// vendor clients must not forward these in request bodies.
pub(crate) const CONNECTOR_PARAM_KEYS: &[&str] = &[
    "pre_prompt",
    "post_prompt",
    "timeout_seconds",
    "allow_retries",
    "retries_times",
];

/// Transport failure from reqwest.
pub(crate) fn send_error(connector_id: &str, err: reqwest::Error) -> CoreError {
    CoreError::Network {
        connector_id: connector_id.to_string(),
        message: err.to_string(),
    }
}

/// Map non-success statuses to typed errors; 429 carries `Retry-After`.
pub(crate) async fn check_status(
    connector_id: &str,
    response: reqwest::Response,
) -> CoreResult<reqwest::Response> {
    let status = response.status();
    match status.as_u16() {
        200..=299 => Ok(response),

        429 => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(CoreError::RateLimited {
                connector_id: connector_id.to_string(),
                retry_after,
            })
        }

        code => {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| status.to_string());
            Err(CoreError::Provider {
                connector_id: connector_id.to_string(),
                status: Some(code),
                message,
            })
        }
    }
}
