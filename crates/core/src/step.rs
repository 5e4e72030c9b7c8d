//! Step types and typed step configuration
//!
//! Steps are persisted in their boundary form ([`StepSpec`]: a type tag plus a
//! JSON object). The typed views ([`StepType`], [`StepConfig`]) are derived
//! from it, both when a definition is created and again when a step runs.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of step types the engine knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Pull data from an external source
    Fetch,
    /// Transform, clean or aggregate data
    Process,
    /// Run a model over the data
    Infer,
    /// Notify a user through a channel
    Notify,
}

impl StepType {
    /// Every step type, in declaration order
    pub const ALL: [StepType; 4] = [
        StepType::Fetch,
        StepType::Process,
        StepType::Infer,
        StepType::Notify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Process => "process",
            Self::Infer => "infer",
            Self::Notify => "notify",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = UnknownStepType;

    /// Accepts the canonical tags and the legacy `data_fetch`, `data_process`,
    /// `ai_inference` and `notify_user` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fetch" | "data_fetch" => Ok(Self::Fetch),
            "process" | "data_process" => Ok(Self::Process),
            "infer" | "ai_inference" => Ok(Self::Infer),
            "notify" | "notify_user" => Ok(Self::Notify),
            other => Err(UnknownStepType(other.to_string())),
        }
    }
}

/// A step type tag outside the closed set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown step type '{0}' (expected one of: fetch, process, infer, notify)")]
pub struct UnknownStepType(pub String);

/// Step configuration is malformed or missing required fields
///
/// Never retried: the configuration will not change between attempts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One step within a workflow definition, in its persisted form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// 0-based position within the definition
    pub index: u32,

    /// Display name
    pub name: String,

    /// Step type tag, resolved through [`StepType::from_str`]
    #[serde(rename = "type")]
    pub step_type: String,

    /// Handler-specific configuration (a JSON object)
    #[serde(default)]
    pub config: Value,
}

impl StepSpec {
    pub fn new(index: u32, step_type: StepType, name: impl Into<String>, config: Value) -> Self {
        Self {
            index,
            name: name.into(),
            step_type: step_type.as_str().to_string(),
            config,
        }
    }

    /// Resolve the type tag into the closed enum
    pub fn resolve_type(&self) -> Result<StepType, UnknownStepType> {
        self.step_type.parse()
    }
}

// ============================================================================
// Typed configuration
// ============================================================================

fn default_source() -> String {
    "default_source".to_string()
}

fn default_operation() -> String {
    "transform".to_string()
}

fn default_model() -> String {
    "default_model".to_string()
}

fn default_recipient() -> String {
    "user@example.com".to_string()
}

fn default_record_count() -> u64 {
    100
}

fn default_predictions() -> u64 {
    10
}

fn default_fetch_delay() -> f64 {
    2.0
}

fn default_process_delay() -> f64 {
    3.0
}

fn default_infer_delay() -> f64 {
    5.0
}

fn default_notify_delay() -> f64 {
    1.0
}

/// Configuration for a `fetch` step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default = "default_record_count")]
    pub expected_records: u64,

    /// Simulated latency in seconds
    #[serde(default = "default_fetch_delay")]
    pub delay: f64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Configuration for a `process` step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default = "default_operation")]
    pub operation: String,

    #[serde(default = "default_record_count")]
    pub records: u64,

    /// Simulated latency in seconds
    #[serde(default = "default_process_delay")]
    pub delay: f64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Configuration for an `infer` step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_predictions")]
    pub expected_predictions: u64,

    /// Simulated latency in seconds
    #[serde(default = "default_infer_delay")]
    pub delay: f64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Delivery channel for a `notify` step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyChannel {
    #[default]
    Email,
    Sms,
    Push,
    Webhook,
}

impl fmt::Display for NotifyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Sms => write!(f, "sms"),
            Self::Push => write!(f, "push"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

/// Configuration for a `notify` step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub channel: NotifyChannel,

    #[serde(default = "default_recipient")]
    pub recipient: String,

    /// Simulated latency in seconds
    #[serde(default = "default_notify_delay")]
    pub delay: f64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed configuration, one variant per [`StepType`]
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    Fetch(FetchConfig),
    Process(ProcessConfig),
    Infer(InferConfig),
    Notify(NotifyConfig),
}

impl StepConfig {
    /// Parse and validate a raw config object for the given step type
    ///
    /// A missing (`null`) config is treated as an empty object so every field
    /// falls back to its default.
    pub fn parse(step_type: StepType, raw: &Value) -> Result<Self, ConfigurationError> {
        let object = match raw {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => raw.clone(),
            other => {
                return Err(ConfigurationError::new(format!(
                    "{} step config must be a JSON object, got {}",
                    step_type,
                    json_kind(other)
                )))
            }
        };

        let invalid = |e: serde_json::Error| {
            ConfigurationError::new(format!("invalid {} step config: {}", step_type, e))
        };

        let config = match step_type {
            StepType::Fetch => Self::Fetch(serde_json::from_value(object).map_err(invalid)?),
            StepType::Process => Self::Process(serde_json::from_value(object).map_err(invalid)?),
            StepType::Infer => Self::Infer(serde_json::from_value(object).map_err(invalid)?),
            StepType::Notify => Self::Notify(serde_json::from_value(object).map_err(invalid)?),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn step_type(&self) -> StepType {
        match self {
            Self::Fetch(_) => StepType::Fetch,
            Self::Process(_) => StepType::Process,
            Self::Infer(_) => StepType::Infer,
            Self::Notify(_) => StepType::Notify,
        }
    }

    /// Simulated latency of the step
    pub fn delay(&self) -> Duration {
        let secs = match self {
            Self::Fetch(c) => c.delay,
            Self::Process(c) => c.delay,
            Self::Infer(c) => c.delay,
            Self::Notify(c) => c.delay,
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let (delay, required): (f64, Option<(&str, &str)>) = match self {
            Self::Fetch(c) => (c.delay, Some(("source", c.source.as_str()))),
            Self::Process(c) => (c.delay, Some(("operation", c.operation.as_str()))),
            Self::Infer(c) => (c.delay, Some(("model", c.model.as_str()))),
            Self::Notify(c) => (c.delay, Some(("recipient", c.recipient.as_str()))),
        };

        if !delay.is_finite() || delay < 0.0 {
            return Err(ConfigurationError::new(format!(
                "{} step config: 'delay' must be a non-negative number of seconds, got {}",
                self.step_type(),
                delay
            )));
        }

        if let Some((field, value)) = required {
            if value.trim().is_empty() {
                return Err(ConfigurationError::new(format!(
                    "{} step config: '{}' must not be empty",
                    self.step_type(),
                    field
                )));
            }
        }

        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
