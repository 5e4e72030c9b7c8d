// Workflow definitions
//
// A definition is an immutable, ordered list of steps owned by one user.
// Validation runs once when the definition is created; the engine re-resolves
// step types at run time because persisted rows may predate a code change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::step::{ConfigurationError, StepConfig, StepSpec, UnknownStepType};

/// Errors raised while validating a workflow definition
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow must contain at least one step")]
    NoSteps,

    #[error("step {index} must have a name")]
    MissingStepName { index: u32 },

    #[error("step {position} has index {index}; indexes must be contiguous from 0")]
    NonContiguousIndex { position: usize, index: u32 },

    #[error("step {index}: {source}")]
    UnknownStepType {
        index: u32,
        #[source]
        source: UnknownStepType,
    },

    #[error("step {index}: {source}")]
    InvalidConfig {
        index: u32,
        #[source]
        source: ConfigurationError,
    },
}

/// A step as supplied by the caller; its index is its position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStep {
    pub name: String,

    #[serde(rename = "type")]
    pub step_type: String,

    #[serde(default)]
    pub config: Value,
}

impl NewStep {
    pub fn new(step_type: impl Into<String>, name: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            config,
        }
    }
}

/// Request to register a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkflowDefinition {
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<NewStep>,
}

impl NewWorkflowDefinition {
    pub fn new(owner_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            owner_id,
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: NewStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Validate and assign identity, producing an immutable definition
    pub fn build(self) -> Result<WorkflowDefinition, DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }

        let steps: Vec<StepSpec> = self
            .steps
            .into_iter()
            .enumerate()
            .map(|(position, step)| StepSpec {
                index: position as u32,
                name: step.name,
                step_type: step.step_type,
                config: step.config,
            })
            .collect();

        validate_steps(&steps)?;

        Ok(WorkflowDefinition {
            id: Uuid::now_v7(),
            owner_id: self.owner_id,
            name: self.name,
            description: self.description,
            steps,
            created_at: Utc::now(),
        })
    }
}

/// Check every step invariant: non-empty, contiguous indexes, named steps,
/// known types and well-formed configs.
pub fn validate_steps(steps: &[StepSpec]) -> Result<(), DefinitionError> {
    if steps.is_empty() {
        return Err(DefinitionError::NoSteps);
    }

    for (position, step) in steps.iter().enumerate() {
        if step.index as usize != position {
            return Err(DefinitionError::NonContiguousIndex {
                position,
                index: step.index,
            });
        }

        if step.name.trim().is_empty() {
            return Err(DefinitionError::MissingStepName { index: step.index });
        }

        let step_type = step
            .resolve_type()
            .map_err(|source| DefinitionError::UnknownStepType {
                index: step.index,
                source,
            })?;

        StepConfig::parse(step_type, &step.config).map_err(|source| {
            DefinitionError::InvalidConfig {
                index: step.index,
                source,
            }
        })?;
    }

    Ok(())
}

/// Immutable workflow template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub steps: Vec<StepSpec>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn step(&self, index: u32) -> Option<&StepSpec> {
        self.steps.get(index as usize)
    }

    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }
}
