// Core Workflow Abstractions
//
// DB-agnostic domain model shared by the engine and the worker binary.
//
// Key design decisions:
// - Definitions keep steps in their boundary form (type tag + JSON config)
// - Typed step configuration is derived from that form and validated at creation
// - Execution records carry everything needed to resume: step pointer, attempt
//   counter, retry due time and invocation lease
// - Status and outcome values serialize exactly as stored (SCREAMING_SNAKE_CASE)

pub mod definition;
pub mod execution;
pub mod step;

// Tracing subscriber setup
pub mod telemetry;

pub use definition::{
    validate_steps, DefinitionError, NewStep, NewWorkflowDefinition, WorkflowDefinition,
};
pub use execution::{
    ExecutionRecord, ExecutionSnapshot, ExecutionStatus, LogOutcome, ParseStatusError,
    StepLogEntry,
};
pub use step::{
    ConfigurationError, FetchConfig, InferConfig, NotifyChannel, NotifyConfig, ProcessConfig,
    StepConfig, StepSpec, StepType, UnknownStepType,
};
