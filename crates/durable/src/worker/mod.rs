//! Worker pool for execution invocations
//!
//! This module provides:
//! - [`WorkerPool`] - bounded-concurrency invocation of the execution engine
//! - [`WorkerPoolConfig`] - concurrency, recovery and shutdown settings
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  ┌──────────────────┐        ┌─────────────────────────┐    │
//! │  │  mpsc enqueue    │◄───────│  Recovery scan (5s)     │    │
//! │  │  (local + delay) │        │  list_dispatchable      │    │
//! │  └────────┬─────────┘        └─────────────────────────┘    │
//! │           │                                                  │
//! │           ▼                                                  │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │      ExecutionEngine::invoke (Semaphore-limited)    │    │
//! │  │  [Run 1] [Run 2] [Run 3] ... [Run N]                │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use flowrun_durable::worker::{WorkerPool, WorkerPoolConfig};
//!
//! let pool = WorkerPool::new(engine, WorkerPoolConfig::default().with_max_concurrency(20));
//! pool.start().await?;
//!
//! let service = ExecutionService::new(store, Arc::new(pool));
//! ```

mod pool;

pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
