//! Dispatch boundary
//!
//! This module provides:
//! - [`ExecutionQueue`] - how a trigger hands an execution id to the engine
//! - [`InlineQueue`] - runs invocations on the caller's task
//! - [`ExecutionService`] - definition registration, execution start and
//!   owner-scoped status queries
//!
//! The pooled queue used in production is [`WorkerPool`](crate::worker::WorkerPool).

mod queue;
mod service;

pub use queue::{DispatchError, ExecutionQueue, InlineQueue};
pub use service::{ExecutionService, ServiceError};
