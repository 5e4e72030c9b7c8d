//! ExecutionStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowrun_core::{
    ExecutionRecord, ExecutionSnapshot, ExecutionStatus, StepLogEntry, WorkflowDefinition,
};
use uuid::Uuid;

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Workflow definition not found
    #[error("workflow definition not found: {0}")]
    DefinitionNotFound(Uuid),

    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// A conditional update lost against the stored state
    #[error("stale write on execution {execution_id}: {reason}")]
    StaleWrite { execution_id: Uuid, reason: String },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn stale(execution_id: Uuid, reason: impl Into<String>) -> Self {
        Self::StaleWrite {
            execution_id,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DefinitionNotFound(_) | Self::ExecutionNotFound(_)
        )
    }

    pub fn is_stale_write(&self) -> bool {
        matches!(self, Self::StaleWrite { .. })
    }
}

/// Result of asking for the invocation lease on an execution
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// Lease granted (or renewed); carries the record as of the claim
    Claimed(ExecutionRecord),

    /// Another invocation holds a live lease
    Busy { holder: String },
}

/// Durable store for definitions, execution records and step logs
///
/// Every mutation is atomic with respect to concurrent reads. Conditional
/// updates that lose against the stored state fail with
/// [`StoreError::StaleWrite`] rather than overwriting progress.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    // =========================================================================
    // Definitions
    // =========================================================================

    /// Persist a validated definition
    async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), StoreError>;

    /// Load a definition
    async fn get_definition(&self, definition_id: Uuid) -> Result<WorkflowDefinition, StoreError>;

    /// Delete a definition together with its executions and their logs
    async fn delete_definition(&self, definition_id: Uuid) -> Result<(), StoreError>;

    // =========================================================================
    // Execution records
    // =========================================================================

    /// Create a CREATED record at step 0 for the given definition
    async fn create(&self, definition_id: Uuid) -> Result<ExecutionRecord, StoreError>;

    /// Load an execution record
    async fn get(&self, execution_id: Uuid) -> Result<ExecutionRecord, StoreError>;

    /// Move the step pointer forward
    ///
    /// Compare-and-set: fails with `StaleWrite` if `new_index` is not greater
    /// than the stored index or the execution is terminal. Resets the attempt
    /// counter and any pending retry.
    async fn advance(&self, execution_id: Uuid, new_index: u32)
        -> Result<ExecutionRecord, StoreError>;

    /// Transition CREATED → RUNNING and stamp `started_at`
    ///
    /// No-op on RUNNING; `StaleWrite` on a terminal record.
    async fn mark_running(&self, execution_id: Uuid) -> Result<ExecutionRecord, StoreError>;

    /// Transition to SUCCESS or FAILED and stamp `finished_at`
    ///
    /// Clears the lease and any pending retry. `StaleWrite` if the record is
    /// already terminal or `status` is not terminal.
    async fn mark_terminal(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> Result<ExecutionRecord, StoreError>;

    /// Persist the attempt counter (and optional retry due time) for the
    /// current step
    ///
    /// `StaleWrite` if `step_index` is not the stored current index or the
    /// execution is terminal.
    async fn record_attempt(
        &self,
        execution_id: Uuid,
        step_index: u32,
        attempt: u32,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<ExecutionRecord, StoreError>;

    /// List executions of a definition, most recently started first
    ///
    /// Not-yet-started executions come first; ties are broken by creation
    /// time, newest first.
    async fn list_executions(&self, definition_id: Uuid)
        -> Result<Vec<ExecutionRecord>, StoreError>;

    // =========================================================================
    // Invocation lease
    // =========================================================================

    /// Acquire or renew the invocation lease for `ttl`
    ///
    /// Granted when no other owner holds an unexpired lease.
    async fn try_claim(
        &self,
        execution_id: Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Release the lease if `owner` holds it
    async fn release_claim(&self, execution_id: Uuid, owner: &str) -> Result<(), StoreError>;

    /// Non-terminal executions with no live lease whose retry (if any) is due,
    /// oldest first
    async fn list_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StoreError>;

    // =========================================================================
    // Step logs
    // =========================================================================

    /// Append an immutable log entry
    async fn append_log(&self, entry: &StepLogEntry) -> Result<(), StoreError>;

    /// Log entries of an execution, ordered by `recorded_at` then insertion
    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<StepLogEntry>, StoreError>;

    /// Record and logs read as one consistent snapshot
    async fn get_status(&self, execution_id: Uuid) -> Result<ExecutionSnapshot, StoreError>;
}

/// Expiry timestamp for a lease taken at `now`
pub(crate) fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or_else(|| now + chrono::Duration::days(36_500))
}
