//! # Durable Workflow Execution
//!
//! Runs ordered, multi-step workflows to completion with per-step retries,
//! persisting progress so an interrupted run resumes where it stopped.
//!
//! ## Features
//!
//! - **Resumable executions**: the step pointer is persisted before each step runs
//! - **Automatic retries**: fixed exponential backoff, in-process or rescheduled
//! - **Single-runner guarantee**: an invocation lease plus compare-and-set progress
//! - **Append-only step logs**: one entry per attempt, readable with the status
//! - **Worker pool**: bounded concurrency, delayed re-enqueue and crash recovery
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            ExecutionService / ExecutionQueue                 │
//! │  (creates records, enqueues ids, owner-scoped status)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ExecutionEngine                         │
//! │  (lease, resume, retry/backoff, terminal transitions)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              StepRunner  →  StepRegistry handlers            │
//! │  (one attempt, one classification, one log entry)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ExecutionStore                          │
//! │  (PostgreSQL: workflow_definitions, executions, logs)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use flowrun_durable::prelude::*;
//!
//! let store = Arc::new(InMemoryExecutionStore::new());
//! let engine = Arc::new(ExecutionEngine::with_defaults(Arc::clone(&store)));
//! let service = ExecutionService::new(store, Arc::new(InlineQueue::new(engine)));
//!
//! let definition = service
//!     .register_definition(
//!         NewWorkflowDefinition::new(owner_id, "nightly report")
//!             .with_step(NewStep::new("fetch", "Pull CRM", json!({"source": "crm"})))
//!             .with_step(NewStep::new("notify", "Email team", json!({}))),
//!     )
//!     .await?;
//!
//! let execution = service.start_execution(definition.id, owner_id).await?;
//! let snapshot = service.get_status(execution.id, owner_id).await?;
//! ```

pub mod dispatch;
pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod step;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::dispatch::{
        DispatchError, ExecutionQueue, ExecutionService, InlineQueue, ServiceError,
    };
    pub use crate::engine::{
        BackoffMode, EngineConfig, EngineError, ExecutionEngine, InvocationOutcome,
    };
    pub use crate::persistence::{
        ClaimOutcome, ExecutionStore, InMemoryExecutionStore, PostgresExecutionStore, StoreError,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::step::{StepError, StepHandler, StepRegistry, StepResult};
    pub use crate::worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
    pub use flowrun_core::{
        ExecutionRecord, ExecutionSnapshot, ExecutionStatus, LogOutcome, NewStep,
        NewWorkflowDefinition, StepConfig, StepType, WorkflowDefinition,
    };
}

// Re-export key types at crate root
pub use dispatch::{DispatchError, ExecutionQueue, ExecutionService, InlineQueue, ServiceError};
pub use engine::{
    BackoffMode, EngineClock, EngineConfig, EngineError, ExecutionEngine, InvocationOutcome,
};
pub use persistence::{
    ClaimOutcome, ExecutionStore, InMemoryExecutionStore, PostgresExecutionStore, StoreError,
};
pub use reliability::RetryPolicy;
pub use step::{
    RunOutcome, StepError, StepHandler, StepOutcome, StepRegistry, StepRegistryBuilder,
    StepResult, StepRunner,
};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
