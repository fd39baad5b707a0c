//! Runtime data model shared across engine components.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{CoreError, CoreResult};

/// What a run was asked to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerType {
    Recipe,
    Cookbook,
}

impl RunnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recipe => "recipe",
            Self::Cookbook => "cookbook",
        }
    }

    pub fn parse(raw: &str) -> CoreResult<Self> {
        serde_json::from_value(Value::String(raw.to_string()))
            .map_err(|_| CoreError::validation(format!("unknown runner type: {raw}")))
    }
}

/// Lifecycle of a whole run. Advances monotonically; the `_with_errors`
/// variants carry the same position in the lifecycle plus a non-empty
/// `error_messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    RunningWithErrors,
    Completed,
    CompletedWithErrors,
    Cancelled,
    CancelledWithErrors,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::RunningWithErrors => "running_with_errors",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Cancelled => "cancelled",
            Self::CancelledWithErrors => "cancelled_with_errors",
        }
    }

    pub fn parse(raw: &str) -> CoreResult<Self> {
        serde_json::from_value(Value::String(raw.to_string()))
            .map_err(|_| CoreError::validation(format!("unknown run status: {raw}")))
    }

    /// Same lifecycle position, error-carrying flavor.
    pub fn with_errors(self) -> Self {
        match self {
            Self::Running => Self::RunningWithErrors,
            Self::Completed => Self::CompletedWithErrors,
            Self::Cancelled => Self::CancelledWithErrors,
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Cancelled | Self::CancelledWithErrors
        )
    }

    pub fn has_errors(&self) -> bool {
        matches!(
            self,
            Self::RunningWithErrors | Self::CompletedWithErrors | Self::CancelledWithErrors
        )
    }
}

/// Lifecycle of one (connector, recipe, prompt template) task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    RunningPromptProcessing,
    CompletedPromptProcessing,
    Completed,
    CompletedWithErrors,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::RunningPromptProcessing => "running_prompt_processing",
            Self::CompletedPromptProcessing => "completed_prompt_processing",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Lifecycle of one prompt inside a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    #[default]
    Pending,
    Running,
    RunningQueryConnector,
    CompletedQueryConnector,
    RunningMetricsEvaluation,
    CompletedMetricsEvaluation,
    Completed,
    CompletedWithErrors,
    Cancelled,
}

/// A rendered prompt on its way to the connectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub recipe_id: String,
    pub dataset_id: String,
    pub prompt_template_id: String,
    /// Position of the example within its dataset.
    pub prompt_index: usize,
    pub prompt: String,
    pub target: Value,
}

/// What a connector returned for one prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedResult {
    pub response: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl PredictedResult {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            context: Vec::new(),
        }
    }
}

/// One prompt's complete journey through a task: request, connector output,
/// metric output, and terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub connection_id: String,
    pub recipe_id: String,
    pub dataset_id: String,
    pub prompt_template_id: String,
    pub prompt_index: usize,
    pub prompt: String,
    pub target: Value,
    #[serde(default)]
    pub predicted_results: Option<PredictedResult>,
    /// Wall-clock seconds spent in the connector. A cache hit reuses the
    /// stored duration of the original call.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub evaluation_results: serde_json::Map<String, Value>,
    #[serde(default)]
    pub status: PromptStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_messages: Vec<String>,
}

impl Prediction {
    /// Fresh pending prediction for `request` headed to `connection_id`.
    pub fn from_request(request: PromptRequest, connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            recipe_id: request.recipe_id,
            dataset_id: request.dataset_id,
            prompt_template_id: request.prompt_template_id,
            prompt_index: request.prompt_index,
            prompt: request.prompt,
            target: request.target,
            predicted_results: None,
            duration: 0.0,
            evaluation_results: serde_json::Map::new(),
            status: PromptStatus::Pending,
            error_messages: Vec::new(),
        }
    }

    /// Record a failure without losing what was computed so far.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error_messages.push(message.into());
        self.status = PromptStatus::CompletedWithErrors;
    }
}

fn default_percentage() -> u8 {
    100
}

/// Arguments a caller hands to the run engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerArgs {
    #[serde(default)]
    pub cookbooks: Vec<String>,
    #[serde(default)]
    pub recipes: Vec<String>,
    #[serde(default = "default_percentage")]
    pub prompt_selection_percentage: u8,
    #[serde(default)]
    pub random_seed: u64,
    #[serde(default)]
    pub system_prompt: String,
}

impl Default for RunnerArgs {
    fn default() -> Self {
        Self {
            cookbooks: Vec::new(),
            recipes: Vec::new(),
            prompt_selection_percentage: default_percentage(),
            random_seed: 0,
            system_prompt: String::new(),
        }
    }
}

impl RunnerArgs {
    /// Argument-shape checks that reject a run before it starts.
    pub fn validate(&self) -> CoreResult<()> {
        if !(1..=100).contains(&self.prompt_selection_percentage) {
            return Err(CoreError::validation(format!(
                "prompt_selection_percentage must be in 1..=100, got {}",
                self.prompt_selection_percentage
            )));
        }
        Ok(())
    }

    /// Which collection drives the run. Exactly one of `cookbooks` and
    /// `recipes` must be non-empty.
    pub fn selection(&self) -> CoreResult<RunnerType> {
        match (self.cookbooks.is_empty(), self.recipes.is_empty()) {
            (false, true) => Ok(RunnerType::Cookbook),
            (true, false) => Ok(RunnerType::Recipe),
            (true, true) => Err(CoreError::validation(
                "nothing to run: both cookbooks and recipes are empty",
            )),
            (false, false) => Err(CoreError::validation(
                "ambiguous run: cookbooks and recipes are both non-empty",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_snake_case() -> anyhow::Result<()> {
        assert_eq!(
            serde_json::to_value(RunStatus::CompletedWithErrors)?,
            "completed_with_errors"
        );
        assert_eq!(
            serde_json::to_value(TaskStatus::RunningPromptProcessing)?,
            "running_prompt_processing"
        );
        assert_eq!(
            serde_json::to_value(PromptStatus::RunningQueryConnector)?,
            "running_query_connector"
        );
        assert_eq!(RunStatus::parse("cancelled")?, RunStatus::Cancelled);
        assert!(RunStatus::parse("exploded").is_err());
        Ok(())
    }

    #[test]
    fn with_errors_keeps_lifecycle_position() {
        assert_eq!(
            RunStatus::Running.with_errors(),
            RunStatus::RunningWithErrors
        );
        assert_eq!(
            RunStatus::Cancelled.with_errors(),
            RunStatus::CancelledWithErrors
        );
        assert_eq!(RunStatus::Pending.with_errors(), RunStatus::Pending);
        assert!(RunStatus::CancelledWithErrors.is_terminal());
        assert!(!RunStatus::RunningWithErrors.is_terminal());
    }

    #[test]
    fn runner_args_defaults_and_validation() -> anyhow::Result<()> {
        let args: RunnerArgs = serde_json::from_str(r#"{"recipes": ["r1"]}"#)?;
        assert_eq!(args.prompt_selection_percentage, 100);
        assert_eq!(args.random_seed, 0);
        args.validate()?;
        assert_eq!(args.selection()?, RunnerType::Recipe);

        let bad = RunnerArgs {
            prompt_selection_percentage: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let neither = RunnerArgs::default();
        assert!(neither.selection().is_err());

        let both = RunnerArgs {
            cookbooks: vec!["c".into()],
            recipes: vec!["r".into()],
            ..Default::default()
        };
        assert!(both.selection().is_err());
        Ok(())
    }

    #[test]
    fn prediction_failure_keeps_partial_state() {
        let req = PromptRequest {
            recipe_id: "r".into(),
            dataset_id: "d".into(),
            prompt_template_id: "no-template".into(),
            prompt_index: 2,
            prompt: "q".into(),
            target: Value::String("a".into()),
        };
        let mut pred = Prediction::from_request(req, "ep");
        pred.predicted_results = Some(PredictedResult::text("partial"));
        pred.fail("metric blew up");
        assert_eq!(pred.status, PromptStatus::CompletedWithErrors);
        assert_eq!(pred.predicted_results.as_ref().map(|p| p.response.as_str()), Some("partial"));
        assert_eq!(pred.error_messages.len(), 1);
    }
}
