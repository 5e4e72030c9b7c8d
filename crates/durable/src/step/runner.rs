//! Step runner: one attempt, one classification, one log entry

use std::sync::Arc;
use std::time::Instant;

use flowrun_core::{LogOutcome, StepConfig, StepLogEntry, StepSpec, StepType};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::handler::{StepError, StepResult};
use super::registry::StepRegistry;
use crate::persistence::{ExecutionStore, StoreError};

/// Classified result of one step attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The step succeeded; move on
    Completed(StepResult),

    /// The step failed but has attempts left
    TransientFailure(String),

    /// The step cannot succeed (bad configuration or attempts exhausted)
    FatalFailure(String),
}

/// Runs single step attempts and records them
pub struct StepRunner<S: ExecutionStore> {
    registry: Arc<StepRegistry>,
    store: Arc<S>,
    max_attempts: u32,
}

impl<S: ExecutionStore> StepRunner<S> {
    pub fn new(registry: Arc<StepRegistry>, store: Arc<S>, max_attempts: u32) -> Self {
        Self {
            registry,
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run attempt `attempt` (1-based) of `step`
    ///
    /// Exactly one log entry is appended before returning. A failure to
    /// append it is the only error this returns.
    #[instrument(skip(self, step), fields(step_index = step.index, step_name = %step.name))]
    pub async fn run(
        &self,
        execution_id: Uuid,
        step: &StepSpec,
        step_type: StepType,
        attempt: u32,
    ) -> Result<RunOutcome, StoreError> {
        let started = Instant::now();
        let outcome = self.attempt(step, step_type, attempt).await;
        let duration = started.elapsed();

        let (log_outcome, message) = match &outcome {
            RunOutcome::Completed(result) => (LogOutcome::Success, result.message.clone()),
            RunOutcome::TransientFailure(reason) => (LogOutcome::Retrying, reason.clone()),
            RunOutcome::FatalFailure(reason) => (LogOutcome::Failed, reason.clone()),
        };

        let entry = StepLogEntry::new(
            execution_id,
            step.index,
            &step.name,
            log_outcome,
            message,
            duration,
            attempt,
        );
        self.store.append_log(&entry).await?;

        debug!(
            %execution_id,
            attempt,
            outcome = %log_outcome,
            duration_ms = duration.as_millis() as u64,
            "step attempt recorded"
        );
        Ok(outcome)
    }

    async fn attempt(&self, step: &StepSpec, step_type: StepType, attempt: u32) -> RunOutcome {
        let config = match StepConfig::parse(step_type, &step.config) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "step configuration rejected");
                return RunOutcome::FatalFailure(e.message);
            }
        };

        let handler = self.registry.handler(step_type);
        match handler.execute(&config).await {
            Ok(result) if result.is_success() => RunOutcome::Completed(result),
            Ok(result) if attempt < self.max_attempts => {
                debug!(attempt, max_attempts = self.max_attempts, "step failed, will retry");
                RunOutcome::TransientFailure(result.message)
            }
            Ok(result) => RunOutcome::FatalFailure(format!(
                "Step failed after {} attempts: {}",
                attempt, result.message
            )),
            Err(StepError::Configuration(e)) => {
                warn!(error = %e, "step handler reported a configuration error");
                RunOutcome::FatalFailure(e.message)
            }
        }
    }
}
