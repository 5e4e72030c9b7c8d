//! Execution engine
//!
//! The engine module provides the `ExecutionEngine` which drives one
//! execution through its steps, persisting progress before every step so an
//! interrupted run resumes where it stopped.

mod clock;
mod executor;

pub use clock::EngineClock;
pub use executor::{BackoffMode, EngineConfig, EngineError, ExecutionEngine, InvocationOutcome};
