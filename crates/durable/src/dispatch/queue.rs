//! Execution queues

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::engine::{EngineError, ExecutionEngine, InvocationOutcome};
use crate::persistence::ExecutionStore;

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The queue no longer accepts work
    #[error("execution queue is closed")]
    QueueClosed,

    /// An inline invocation failed
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Hands execution ids to the engine
///
/// Enqueueing the same id more than once is allowed: terminal executions are
/// skipped and the invocation lease keeps two runs from overlapping.
#[async_trait]
pub trait ExecutionQueue: Send + Sync + 'static {
    /// Schedule an invocation as soon as possible
    async fn enqueue(&self, execution_id: Uuid) -> Result<(), DispatchError>;

    /// Schedule an invocation after `delay`
    async fn enqueue_after(&self, execution_id: Uuid, delay: Duration)
        -> Result<(), DispatchError>;
}

/// Runs invocations to completion on the caller's task
///
/// Rescheduled retries are waited out in place, so `enqueue` returns once the
/// execution is terminal or held by someone else.
pub struct InlineQueue<S: ExecutionStore> {
    engine: Arc<ExecutionEngine<S>>,
}

impl<S: ExecutionStore> InlineQueue<S> {
    pub fn new(engine: Arc<ExecutionEngine<S>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine<S>> {
        &self.engine
    }
}

#[async_trait]
impl<S: ExecutionStore> ExecutionQueue for InlineQueue<S> {
    async fn enqueue(&self, execution_id: Uuid) -> Result<(), DispatchError> {
        loop {
            match self.engine.invoke(execution_id).await? {
                InvocationOutcome::RetryScheduled { delay, .. } => {
                    debug!(%execution_id, delay_secs = delay.as_secs_f64(), "waiting for rescheduled retry");
                    tokio::time::sleep(delay).await;
                }
                _ => return Ok(()),
            }
        }
    }

    async fn enqueue_after(
        &self,
        execution_id: Uuid,
        delay: Duration,
    ) -> Result<(), DispatchError> {
        tokio::time::sleep(delay).await;
        self.enqueue(execution_id).await
    }
}
