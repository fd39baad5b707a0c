//! Error types shared across the run engine and its collaborators.

use std::time::Duration;

/// Core errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Invalid argument shape or value.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Catalog record absent on disk.
    #[error("not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Storage backend name did not resolve.
    #[error("unknown storage backend: {kind}")]
    UnknownBackend { kind: String },

    /// Connector type name did not resolve.
    #[error("unknown connector type: {connector_type}")]
    UnknownConnector { connector_type: String },

    /// Plug-in module (metric) name did not resolve.
    #[error("unknown {kind}: {id}")]
    UnknownModule { kind: &'static str, id: String },

    /// Vendor endpoint rejected the call with a rate-limit response.
    #[error("rate limited by {connector_id}: retry after {retry_after:?}")]
    RateLimited {
        connector_id: String,
        retry_after: Option<Duration>,
    },

    /// Vendor call exceeded the per-call timeout.
    #[error("timeout after {seconds}s calling {connector_id}")]
    Timeout { connector_id: String, seconds: u64 },

    /// Vendor endpoint returned an error response.
    #[error("provider error from {connector_id} (status {status:?}): {message}")]
    Provider {
        connector_id: String,
        status: Option<u16>,
        message: String,
    },

    /// Transport-level failure reaching the vendor endpoint.
    #[error("network error calling {connector_id}: {message}")]
    Network {
        connector_id: String,
        message: String,
    },

    /// Prediction cache read or write failed.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// A metric failed while evaluating one prompt or bucket.
    #[error("metric {metric_id} failed: {message}")]
    Metric { metric_id: String, message: String },

    /// Cooperative cancellation observed at a checkpoint.
    #[error("run cancelled")]
    Cancelled,

    /// The run could not bring up its database or initial state.
    #[error("fatal run error: {message}")]
    FatalRun { message: String },

    /// Filesystem error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// Prompt template rendering error.
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
}

impl CoreError {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a missing catalog record.
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Shorthand for a cache failure.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Shorthand for a fatal run failure.
    pub fn fatal_run(message: impl Into<String>) -> Self {
        Self::FatalRun {
            message: message.into(),
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Bad input / config issues
            Self::Validation { .. } => 1,
            Self::Template { .. } => 1,

            // Missing records
            Self::NotFound { .. } => 2,

            // Unresolvable plug-in names
            Self::UnknownBackend { .. } => 3,
            Self::UnknownConnector { .. } => 3,
            Self::UnknownModule { .. } => 3,

            // Remote endpoint failures
            Self::RateLimited { .. } => 4,
            Self::Timeout { .. } => 4,
            Self::Provider { .. } => 4,
            Self::Network { .. } => 4,

            // Local storage failures
            Self::Cache { .. } => 5,
            Self::Db { .. } => 5,
            Self::Io { .. } => 5,
            Self::Json { .. } => 5,
            Self::Metric { .. } => 5,

            Self::Cancelled => 6,
            Self::FatalRun { .. } => 7,
        }
    }

    /// Whether a connector retry loop may try the call again.
    ///
    /// Provider errors are retryable only for 5xx statuses; a 4xx will not
    /// heal on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Network { .. } => true,
            Self::Provider { status, .. } => matches!(status, Some(s) if *s >= 500),
            _ => false,
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
