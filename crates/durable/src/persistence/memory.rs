//! In-memory implementation of ExecutionStore for testing

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowrun_core::{
    ExecutionRecord, ExecutionSnapshot, ExecutionStatus, StepLogEntry, WorkflowDefinition,
};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;

/// Everything behind one lock so snapshots and multi-row updates are atomic
#[derive(Default)]
struct State {
    definitions: HashMap<Uuid, WorkflowDefinition>,
    executions: HashMap<Uuid, ExecutionRecord>,
    logs: HashMap<Uuid, Vec<StepLogEntry>>,
}

impl State {
    fn execution_mut(&mut self, execution_id: Uuid) -> Result<&mut ExecutionRecord, StoreError> {
        self.executions
            .get_mut(&execution_id)
            .ok_or(StoreError::ExecutionNotFound(execution_id))
    }

    fn sorted_logs(&self, execution_id: Uuid) -> Vec<StepLogEntry> {
        let mut logs = self.logs.get(&execution_id).cloned().unwrap_or_default();
        // stable: equal timestamps keep insertion order
        logs.sort_by_key(|entry| entry.recorded_at);
        logs
    }
}

/// In-memory implementation of ExecutionStore
///
/// This is primarily for testing and the one-shot `run` command. It stores
/// all data in memory and provides the same semantics as the PostgreSQL
/// implementation.
///
/// # Example
///
/// ```
/// use flowrun_durable::InMemoryExecutionStore;
///
/// let store = InMemoryExecutionStore::new();
/// assert_eq!(store.execution_count(), 0);
/// ```
pub struct InMemoryExecutionStore {
    state: RwLock<State>,
}

impl InMemoryExecutionStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Get the number of execution records
    pub fn execution_count(&self) -> usize {
        self.state.read().executions.len()
    }

    /// Get the number of log entries across all executions
    pub fn log_count(&self) -> usize {
        self.state.read().logs.values().map(Vec::len).sum()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.definitions.clear();
        state.executions.clear();
        state.logs.clear();
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), StoreError> {
        self.state
            .write()
            .definitions
            .insert(definition.id, definition.clone());
        Ok(())
    }

    async fn get_definition(&self, definition_id: Uuid) -> Result<WorkflowDefinition, StoreError> {
        self.state
            .read()
            .definitions
            .get(&definition_id)
            .cloned()
            .ok_or(StoreError::DefinitionNotFound(definition_id))
    }

    async fn delete_definition(&self, definition_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.definitions.remove(&definition_id).is_none() {
            return Err(StoreError::DefinitionNotFound(definition_id));
        }

        let doomed: Vec<Uuid> = state
            .executions
            .values()
            .filter(|e| e.workflow_id == definition_id)
            .map(|e| e.id)
            .collect();
        for execution_id in doomed {
            state.executions.remove(&execution_id);
            state.logs.remove(&execution_id);
        }
        Ok(())
    }

    async fn create(&self, definition_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        let mut state = self.state.write();
        let owner_id = state
            .definitions
            .get(&definition_id)
            .map(|d| d.owner_id)
            .ok_or(StoreError::DefinitionNotFound(definition_id))?;

        let record = ExecutionRecord::new(definition_id, owner_id);
        state.executions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, execution_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        self.state
            .read()
            .executions
            .get(&execution_id)
            .cloned()
            .ok_or(StoreError::ExecutionNotFound(execution_id))
    }

    async fn advance(
        &self,
        execution_id: Uuid,
        new_index: u32,
    ) -> Result<ExecutionRecord, StoreError> {
        let mut state = self.state.write();
        let record = state.execution_mut(execution_id)?;

        if record.is_terminal() {
            return Err(StoreError::stale(
                execution_id,
                format!("cannot advance a {} execution", record.status),
            ));
        }
        if new_index <= record.current_step_index {
            return Err(StoreError::stale(
                execution_id,
                format!(
                    "step index {} is not ahead of stored index {}",
                    new_index, record.current_step_index
                ),
            ));
        }

        record.current_step_index = new_index;
        record.step_attempt = 0;
        record.next_attempt_at = None;
        Ok(record.clone())
    }

    async fn mark_running(&self, execution_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        let mut state = self.state.write();
        let record = state.execution_mut(execution_id)?;

        match record.status {
            ExecutionStatus::Created => {
                record.status = ExecutionStatus::Running;
                record.started_at.get_or_insert_with(Utc::now);
            }
            ExecutionStatus::Running => {}
            terminal => {
                return Err(StoreError::stale(
                    execution_id,
                    format!("cannot start a {} execution", terminal),
                ))
            }
        }
        Ok(record.clone())
    }

    async fn mark_terminal(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> Result<ExecutionRecord, StoreError> {
        let mut state = self.state.write();
        let record = state.execution_mut(execution_id)?;

        if !status.is_terminal() {
            return Err(StoreError::stale(
                execution_id,
                format!("{} is not a terminal status", status),
            ));
        }
        if record.is_terminal() {
            return Err(StoreError::stale(
                execution_id,
                format!("execution already {}", record.status),
            ));
        }

        record.status = status;
        record.finished_at = Some(Utc::now());
        record.error_message = error_message;
        record.next_attempt_at = None;
        record.claimed_by = None;
        record.claim_expires_at = None;
        Ok(record.clone())
    }

    async fn record_attempt(
        &self,
        execution_id: Uuid,
        step_index: u32,
        attempt: u32,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<ExecutionRecord, StoreError> {
        let mut state = self.state.write();
        let record = state.execution_mut(execution_id)?;

        if record.is_terminal() || record.current_step_index != step_index {
            return Err(StoreError::stale(
                execution_id,
                format!(
                    "attempt for step {} does not match {} execution at step {}",
                    step_index, record.status, record.current_step_index
                ),
            ));
        }

        record.step_attempt = attempt;
        record.next_attempt_at = next_attempt_at;
        Ok(record.clone())
    }

    async fn list_executions(
        &self,
        definition_id: Uuid,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let state = self.state.read();
        let mut records: Vec<ExecutionRecord> = state
            .executions
            .values()
            .filter(|e| e.workflow_id == definition_id)
            .cloned()
            .collect();

        // unstarted runs first, then newest start
        records.sort_by(|a, b| {
            b.started_at
                .is_none()
                .cmp(&a.started_at.is_none())
                .then_with(|| b.started_at.cmp(&a.started_at))
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(records)
    }

    async fn try_claim(
        &self,
        execution_id: Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state.write();
        let record = state.execution_mut(execution_id)?;
        let now = Utc::now();

        if record.is_claimed_by_other(owner, now) {
            return Ok(ClaimOutcome::Busy {
                holder: record.claimed_by.clone().unwrap_or_default(),
            });
        }

        record.claimed_by = Some(owner.to_string());
        record.claim_expires_at = Some(lease_expiry(now, ttl));
        Ok(ClaimOutcome::Claimed(record.clone()))
    }

    async fn release_claim(&self, execution_id: Uuid, owner: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let record = state.execution_mut(execution_id)?;

        if record.claimed_by.as_deref() == Some(owner) {
            record.claimed_by = None;
            record.claim_expires_at = None;
        }
        Ok(())
    }

    async fn list_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.read();
        let mut due: Vec<&ExecutionRecord> = state
            .executions
            .values()
            .filter(|e| e.is_dispatchable(now))
            .collect();
        due.sort_by_key(|e| (e.created_at, e.id));
        Ok(due.into_iter().take(limit).map(|e| e.id).collect())
    }

    async fn append_log(&self, entry: &StepLogEntry) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if !state.executions.contains_key(&entry.execution_id) {
            return Err(StoreError::ExecutionNotFound(entry.execution_id));
        }
        state
            .logs
            .entry(entry.execution_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<StepLogEntry>, StoreError> {
        let state = self.state.read();
        if !state.executions.contains_key(&execution_id) {
            return Err(StoreError::ExecutionNotFound(execution_id));
        }
        Ok(state.sorted_logs(execution_id))
    }

    async fn get_status(&self, execution_id: Uuid) -> Result<ExecutionSnapshot, StoreError> {
        let state = self.state.read();
        let record = state
            .executions
            .get(&execution_id)
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;
        Ok(ExecutionSnapshot::new(record, state.sorted_logs(execution_id)))
    }
}
