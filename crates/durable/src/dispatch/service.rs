//! Execution service
//!
//! Entry point for triggers and status readers. Every read and write is
//! scoped to the requesting user: a definition or execution owned by someone
//! else is reported as not found.

use std::sync::Arc;

use flowrun_core::{
    DefinitionError, ExecutionRecord, ExecutionSnapshot, NewWorkflowDefinition, WorkflowDefinition,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::queue::{DispatchError, ExecutionQueue};
use crate::persistence::{ExecutionStore, StoreError};

/// Service errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The submitted definition is invalid
    #[error("invalid workflow definition: {0}")]
    Definition(#[from] DefinitionError),

    /// Unknown definition, or owned by another user
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    /// Unknown execution, or owned by another user
    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    /// Store error
    #[error("store error: {0}")]
    Store(StoreError),

    /// The execution was created but could not be dispatched
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DefinitionNotFound(id) => Self::WorkflowNotFound(id),
            StoreError::ExecutionNotFound(id) => Self::ExecutionNotFound(id),
            other => Self::Store(other),
        }
    }
}

/// Definitions, execution start and status queries behind one facade
pub struct ExecutionService<S: ExecutionStore, Q: ExecutionQueue> {
    store: Arc<S>,
    queue: Arc<Q>,
}

impl<S: ExecutionStore, Q: ExecutionQueue> ExecutionService<S, Q> {
    pub fn new(store: Arc<S>, queue: Arc<Q>) -> Self {
        Self { store, queue }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Validate and persist a new definition
    #[instrument(skip(self, definition), fields(owner_id = %definition.owner_id))]
    pub async fn register_definition(
        &self,
        definition: NewWorkflowDefinition,
    ) -> Result<WorkflowDefinition, ServiceError> {
        let definition = definition.build()?;
        self.store.save_definition(&definition).await?;

        info!(
            workflow_id = %definition.id,
            name = %definition.name,
            steps = definition.steps.len(),
            "workflow registered"
        );
        Ok(definition)
    }

    /// Delete a definition together with its executions and logs
    #[instrument(skip(self))]
    pub async fn delete_definition(
        &self,
        definition_id: Uuid,
        requester: Uuid,
    ) -> Result<(), ServiceError> {
        self.owned_definition(definition_id, requester).await?;
        self.store.delete_definition(definition_id).await?;
        info!(workflow_id = %definition_id, "workflow deleted");
        Ok(())
    }

    /// Create a CREATED execution and hand it to the queue
    ///
    /// If dispatch fails the record stays CREATED and is picked up by a
    /// worker pool's recovery scan.
    #[instrument(skip(self))]
    pub async fn start_execution(
        &self,
        definition_id: Uuid,
        requester: Uuid,
    ) -> Result<ExecutionRecord, ServiceError> {
        self.owned_definition(definition_id, requester).await?;

        let record = self.store.create(definition_id).await?;
        info!(execution_id = %record.id, workflow_id = %definition_id, "execution created");

        self.queue.enqueue(record.id).await?;
        Ok(record)
    }

    /// Current status, pointer and logs of an execution
    pub async fn get_status(
        &self,
        execution_id: Uuid,
        requester: Uuid,
    ) -> Result<ExecutionSnapshot, ServiceError> {
        let record = self.store.get(execution_id).await?;
        if record.owner_id != requester {
            return Err(ServiceError::ExecutionNotFound(execution_id));
        }
        Ok(self.store.get_status(execution_id).await?)
    }

    /// Executions of a definition, most recently started first
    pub async fn list_executions(
        &self,
        definition_id: Uuid,
        requester: Uuid,
    ) -> Result<Vec<ExecutionRecord>, ServiceError> {
        self.owned_definition(definition_id, requester).await?;
        Ok(self.store.list_executions(definition_id).await?)
    }

    /// Snapshot of the most recent execution of a definition, if any
    pub async fn latest_execution(
        &self,
        definition_id: Uuid,
        requester: Uuid,
    ) -> Result<Option<ExecutionSnapshot>, ServiceError> {
        let executions = self.list_executions(definition_id, requester).await?;
        match executions.first() {
            Some(record) => Ok(Some(self.store.get_status(record.id).await?)),
            None => Ok(None),
        }
    }

    async fn owned_definition(
        &self,
        definition_id: Uuid,
        requester: Uuid,
    ) -> Result<WorkflowDefinition, ServiceError> {
        let definition = self.store.get_definition(definition_id).await?;
        if definition.owner_id != requester {
            return Err(ServiceError::WorkflowNotFound(definition_id));
        }
        Ok(definition)
    }
}
