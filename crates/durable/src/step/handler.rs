//! StepHandler trait definition

use async_trait::async_trait;
use flowrun_core::{ConfigurationError, StepConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a handler considers its attempt successful
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    Success,
    /// Expected failure; retried by the engine until attempts run out
    Failure,
}

/// What a handler reports back for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub outcome: StepOutcome,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl StepResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::Success,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::Failure,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Success
    }
}

/// Unexpected handler conditions
///
/// Expected failures are reported as [`StepOutcome::Failure`] instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    /// The configuration cannot be acted on; never retried
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl StepError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::new(message))
    }
}

/// A step handler turns a typed configuration into a result
///
/// Handlers must not mutate shared state beyond emitting their result; the
/// engine may run the same step more than once after a crash.
///
/// # Example
///
/// ```ignore
/// use flowrun_durable::step::{StepError, StepHandler, StepResult};
///
/// struct AlwaysFails;
///
/// #[async_trait]
/// impl StepHandler for AlwaysFails {
///     async fn execute(&self, _config: &StepConfig) -> Result<StepResult, StepError> {
///         Ok(StepResult::failure("upstream unavailable"))
///     }
/// }
/// ```
#[async_trait]
pub trait StepHandler: Send + Sync + 'static {
    /// Run one attempt of the step
    async fn execute(&self, config: &StepConfig) -> Result<StepResult, StepError>;
}
