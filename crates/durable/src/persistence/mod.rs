//! Persistence layer for durable execution
//!
//! This module provides:
//! - [`ExecutionStore`] trait for definitions, execution records and step logs
//! - [`InMemoryExecutionStore`] for testing and one-shot local runs
//! - [`PostgresExecutionStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryExecutionStore;
pub use postgres::PostgresExecutionStore;
pub use store::{ClaimOutcome, ExecutionStore, StoreError};
