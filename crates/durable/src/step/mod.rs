//! Step execution
//!
//! This module provides:
//! - [`StepHandler`] trait implemented by every step type
//! - [`StepRegistry`] mapping each [`StepType`](flowrun_core::StepType) to its handler
//! - Built-in simulated handlers for `fetch`, `process`, `infer` and `notify`
//! - [`StepRunner`] which runs one attempt, classifies it and writes its log entry

mod builtin;
mod handler;
mod registry;
mod runner;

pub use builtin::{FetchHandler, InferHandler, NotifyHandler, ProcessHandler};
pub use handler::{StepError, StepHandler, StepOutcome, StepResult};
pub use registry::{StepRegistry, StepRegistryBuilder};
pub use runner::{RunOutcome, StepRunner};
