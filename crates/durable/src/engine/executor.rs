//! Execution engine
//!
//! The `ExecutionEngine` is responsible for:
//! - Skipping executions that are already terminal
//! - Holding the invocation lease so one execution never runs twice at once
//! - Resuming at the persisted step pointer and attempt counter
//! - Retrying transient step failures in place or by rescheduling
//! - Finalizing the execution as SUCCESS or FAILED

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowrun_core::{
    ExecutionRecord, ExecutionStatus, LogOutcome, StepLogEntry, StepSpec, StepType,
    UnknownStepType, WorkflowDefinition,
};
use tokio::time::MissedTickBehavior;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::EngineClock;
use crate::persistence::{ClaimOutcome, ExecutionStore, StoreError};
use crate::reliability::{duration_millis, RetryPolicy};
use crate::step::{RunOutcome, StepRegistry, StepRunner};

/// How the engine waits out a retry backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    /// Sleep inside the invocation while holding the lease
    #[default]
    InProcess,

    /// Persist the retry due time, release the lease and return
    /// [`InvocationOutcome::RetryScheduled`] so the dispatcher re-enqueues
    Reschedule,
}

impl fmt::Display for BackoffMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProcess => write!(f, "in_process"),
            Self::Reschedule => write!(f, "reschedule"),
        }
    }
}

impl FromStr for BackoffMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in_process" | "in-process" | "sleep" => Ok(Self::InProcess),
            "reschedule" => Ok(Self::Reschedule),
            other => Err(format!("unknown backoff mode '{}'", other)),
        }
    }
}

/// Configuration for the execution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lease owner name for invocations run by this engine
    pub worker_id: String,

    /// Per-step retry policy
    pub retry: RetryPolicy,

    /// How retry backoff is waited out
    pub backoff_mode: BackoffMode,

    /// Lease duration; renewed before every attempt and every third of a
    /// TTL while a step runs
    #[serde(with = "duration_millis")]
    pub claim_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("engine-{}", Uuid::now_v7()),
            retry: RetryPolicy::default(),
            backoff_mode: BackoffMode::InProcess,
            claim_ttl: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    /// Set the lease owner name
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the backoff mode
    pub fn with_backoff_mode(mut self, mode: BackoffMode) -> Self {
        self.backoff_mode = mode;
        self
    }

    /// Set the lease duration
    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }
}

/// Errors that abort an invocation without finalizing the execution
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Store error (including stale writes and missing records)
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Another invocation took over the lease mid-run
    #[error("lease on execution {execution_id} lost to {holder}")]
    LeaseLost { execution_id: Uuid, holder: String },
}

/// What one invocation did
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// The execution was already terminal; nothing changed
    Skipped { status: ExecutionStatus },

    /// Another invocation holds the lease; nothing changed
    Busy { holder: String },

    /// Every step completed
    Succeeded,

    /// The execution was marked FAILED
    Failed { step_index: u32, reason: String },

    /// A retry was persisted; invoke again after `delay`
    RetryScheduled {
        step_index: u32,
        attempt: u32,
        delay: Duration,
    },
}

impl InvocationOutcome {
    /// Delay after which the execution should be invoked again, if any
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RetryScheduled { delay, .. } => Some(*delay),
            _ => None,
        }
    }
}

/// Execution engine
///
/// Runs the steps of one execution strictly in order. Progress is written to
/// the store before each step runs, so a re-invocation after a crash resumes
/// at the step that was in flight.
///
/// # Example
///
/// ```ignore
/// use flowrun_durable::prelude::*;
///
/// let store = Arc::new(InMemoryExecutionStore::new());
/// let engine = ExecutionEngine::new(store, StepRegistry::default(), EngineConfig::default());
///
/// let outcome = engine.invoke(execution_id).await?;
/// ```
pub struct ExecutionEngine<S: ExecutionStore> {
    store: Arc<S>,
    registry: Arc<StepRegistry>,
    runner: StepRunner<S>,
    config: EngineConfig,
    clock: EngineClock,
}

impl<S: ExecutionStore> ExecutionEngine<S> {
    /// Create a new engine
    pub fn new(store: Arc<S>, registry: StepRegistry, config: EngineConfig) -> Self {
        let registry = Arc::new(registry);
        let runner = StepRunner::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.retry.max_attempts,
        );

        Self {
            store,
            registry,
            runner,
            config,
            clock: EngineClock::new(),
        }
    }

    /// Create an engine with the built-in handlers and default config
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, StepRegistry::default(), EngineConfig::default())
    }

    /// Get a reference to the store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get the engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time as the engine sees it when writing and checking retry due times
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run an execution from its persisted resume point
    ///
    /// Safe to call repeatedly and concurrently for the same id: terminal
    /// executions are skipped and a live lease held elsewhere yields
    /// [`InvocationOutcome::Busy`].
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn invoke(&self, execution_id: Uuid) -> Result<InvocationOutcome, EngineError> {
        let record = self.store.get(execution_id).await?;
        if record.is_terminal() {
            debug!(%execution_id, status = %record.status, "execution already terminal");
            return Ok(InvocationOutcome::Skipped {
                status: record.status,
            });
        }

        let record = match self
            .store
            .try_claim(execution_id, &self.config.worker_id, self.config.claim_ttl)
            .await?
        {
            ClaimOutcome::Claimed(record) => record,
            ClaimOutcome::Busy { holder } => {
                debug!(%execution_id, %holder, "execution is held by another invocation");
                return Ok(InvocationOutcome::Busy { holder });
            }
        };

        // it may have finished between the read and the claim
        let result = if record.is_terminal() {
            Ok(InvocationOutcome::Skipped {
                status: record.status,
            })
        } else {
            self.drive(record).await
        };

        if let Err(e) = &result {
            match e {
                EngineError::Store(se) if se.is_stale_write() || se.is_not_found() => {
                    warn!(%execution_id, error = %e, "invocation aborted");
                }
                EngineError::LeaseLost { .. } => {
                    warn!(%execution_id, error = %e, "invocation aborted");
                }
                EngineError::Store(_) => {
                    error!(%execution_id, error = %e, "invocation aborted");
                }
            }
        }

        self.release(execution_id).await;
        result
    }

    #[instrument(skip(self, record), fields(execution_id = %record.id))]
    async fn drive(&self, record: ExecutionRecord) -> Result<InvocationOutcome, EngineError> {
        let execution_id = record.id;
        let definition = self.store.get_definition(record.workflow_id).await?;

        let record = if record.status == ExecutionStatus::Created {
            let started = self.store.mark_running(execution_id).await?;
            info!(
                %execution_id,
                workflow_id = %started.workflow_id,
                steps = definition.steps.len(),
                "execution started"
            );
            started
        } else {
            info!(
                %execution_id,
                step_index = record.current_step_index,
                attempts_so_far = record.step_attempt,
                "resuming execution"
            );
            record
        };

        let step_types = match self.resolve_step_types(&definition) {
            Ok(step_types) => step_types,
            Err((position, unknown)) => {
                return self
                    .fail_unknown_type(execution_id, &definition, position, unknown)
                    .await
            }
        };

        if let Some(remaining) = record.next_attempt_at.and_then(|due| self.clock.until(due)) {
            let step_index = record.current_step_index;
            match self.config.backoff_mode {
                BackoffMode::Reschedule => {
                    debug!(
                        %execution_id,
                        step_index,
                        remaining_secs = remaining.as_secs_f64(),
                        "retry not due yet"
                    );
                    return Ok(InvocationOutcome::RetryScheduled {
                        step_index,
                        attempt: record.step_attempt,
                        delay: remaining,
                    });
                }
                BackoffMode::InProcess => {
                    let ttl = self.config.claim_ttl.saturating_add(remaining);
                    self.renew_lease(execution_id, ttl).await?;
                    debug!(
                        %execution_id,
                        step_index,
                        remaining_secs = remaining.as_secs_f64(),
                        "waiting out pending retry"
                    );
                    tokio::time::sleep(remaining).await;
                }
            }
        }

        let mut persisted_index = record.current_step_index;
        let mut attempt = record.step_attempt;

        for (position, step) in definition
            .steps
            .iter()
            .enumerate()
            .skip(record.current_step_index as usize)
        {
            let step_index = position as u32;
            if step_index > persisted_index {
                self.store.advance(execution_id, step_index).await?;
                persisted_index = step_index;
                attempt = 0;
            }

            loop {
                attempt += 1;
                self.renew_lease(execution_id, self.config.claim_ttl).await?;

                let outcome = self
                    .run_attempt(execution_id, step, step_types[position], attempt)
                    .await?;

                match outcome {
                    RunOutcome::Completed(_) => {
                        debug!(%execution_id, step_index, attempt, "step completed");
                        break;
                    }
                    RunOutcome::TransientFailure(reason) => {
                        let delay = self.config.retry.delay_after_failure(attempt);

                        match self.config.backoff_mode {
                            BackoffMode::InProcess => {
                                self.store
                                    .record_attempt(execution_id, step_index, attempt, None)
                                    .await?;
                                let ttl = self.config.claim_ttl.saturating_add(delay);
                                self.renew_lease(execution_id, ttl).await?;
                                info!(
                                    %execution_id,
                                    step_index,
                                    attempt,
                                    delay_secs = delay.as_secs_f64(),
                                    %reason,
                                    "step failed, retrying after backoff"
                                );
                                tokio::time::sleep(delay).await;
                            }
                            BackoffMode::Reschedule => {
                                let due = self.clock.after(delay);
                                self.store
                                    .record_attempt(execution_id, step_index, attempt, Some(due))
                                    .await?;
                                info!(
                                    %execution_id,
                                    step_index,
                                    attempt,
                                    delay_secs = delay.as_secs_f64(),
                                    %reason,
                                    "step failed, retry rescheduled"
                                );
                                return Ok(InvocationOutcome::RetryScheduled {
                                    step_index,
                                    attempt,
                                    delay,
                                });
                            }
                        }
                    }
                    RunOutcome::FatalFailure(reason) => {
                        let summary = format!(
                            "Failed at step {} ({}): {}",
                            step_index, step.name, reason
                        );
                        self.store
                            .mark_terminal(execution_id, ExecutionStatus::Failed, Some(summary))
                            .await?;
                        warn!(%execution_id, step_index, attempt, %reason, "execution failed");
                        return Ok(InvocationOutcome::Failed { step_index, reason });
                    }
                }
            }
        }

        self.store
            .mark_terminal(execution_id, ExecutionStatus::Success, None)
            .await?;
        info!(%execution_id, "execution succeeded");
        Ok(InvocationOutcome::Succeeded)
    }

    fn resolve_step_types(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<Vec<StepType>, (usize, UnknownStepType)> {
        definition
            .steps
            .iter()
            .enumerate()
            .map(|(position, step)| {
                self.registry
                    .resolve(&step.step_type)
                    .map(|(step_type, _)| step_type)
                    .map_err(|unknown| (position, unknown))
            })
            .collect()
    }

    async fn fail_unknown_type(
        &self,
        execution_id: Uuid,
        definition: &WorkflowDefinition,
        position: usize,
        unknown: UnknownStepType,
    ) -> Result<InvocationOutcome, EngineError> {
        let step = &definition.steps[position];
        let reason = unknown.to_string();

        let entry = StepLogEntry::new(
            execution_id,
            step.index,
            &step.name,
            LogOutcome::Failed,
            &reason,
            Duration::ZERO,
            1,
        );
        self.store.append_log(&entry).await?;

        let summary = format!("Failed at step {} ({}): {}", step.index, step.name, reason);
        self.store
            .mark_terminal(execution_id, ExecutionStatus::Failed, Some(summary))
            .await?;

        warn!(%execution_id, step_index = step.index, %reason, "execution failed before running");
        Ok(InvocationOutcome::Failed {
            step_index: step.index,
            reason,
        })
    }

    /// Run one attempt, renewing the lease until the runner returns
    async fn run_attempt(
        &self,
        execution_id: Uuid,
        step: &StepSpec,
        step_type: StepType,
        attempt: u32,
    ) -> Result<RunOutcome, EngineError> {
        let period = (self.config.claim_ttl / 3)
            .clamp(Duration::from_millis(1), Duration::from_secs(3600));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let run = self.runner.run(execution_id, step, step_type, attempt);
        tokio::pin!(run);

        loop {
            tokio::select! {
                outcome = &mut run => return Ok(outcome?),
                _ = heartbeat.tick() => {
                    self.renew_lease(execution_id, self.config.claim_ttl).await?;
                }
            }
        }
    }

    async fn renew_lease(&self, execution_id: Uuid, ttl: Duration) -> Result<(), EngineError> {
        match self
            .store
            .try_claim(execution_id, &self.config.worker_id, ttl)
            .await?
        {
            ClaimOutcome::Claimed(_) => Ok(()),
            ClaimOutcome::Busy { holder } => Err(EngineError::LeaseLost {
                execution_id,
                holder,
            }),
        }
    }

    async fn release(&self, execution_id: Uuid) {
        if let Err(e) = self
            .store
            .release_claim(execution_id, &self.config.worker_id)
            .await
        {
            debug!(%execution_id, error = %e, "failed to release lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryExecutionStore;
    use flowrun_core::{NewStep, NewWorkflowDefinition};
    use serde_json::json;

    #[test]
    fn test_backoff_mode_parsing() {
        assert_eq!(
            "in_process".parse::<BackoffMode>().unwrap(),
            BackoffMode::InProcess
        );
        assert_eq!(
            "Reschedule".parse::<BackoffMode>().unwrap(),
            BackoffMode::Reschedule
        );
        assert!("later".parse::<BackoffMode>().is_err());
        assert_eq!(BackoffMode::Reschedule.to_string(), "reschedule");
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert!(config.worker_id.starts_with("engine-"));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.backoff_mode, BackoffMode::InProcess);
        assert_eq!(config.claim_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default()
            .with_worker_id("w1")
            .with_backoff_mode(BackoffMode::Reschedule)
            .with_claim_ttl(Duration::from_secs(30));

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["backoff_mode"], json!("reschedule"));
        assert_eq!(value["claim_ttl"], json!(30_000));

        let parsed: EngineConfig = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.worker_id, "w1");
    }

    #[tokio::test]
    async fn test_invoke_missing_execution() {
        let engine = ExecutionEngine::with_defaults(Arc::new(InMemoryExecutionStore::new()));
        let err = engine.invoke(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::ExecutionNotFound(_))));
    }

    #[tokio::test]
    async fn test_single_step_success() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let definition = NewWorkflowDefinition::new(Uuid::now_v7(), "one step")
            .with_step(NewStep::new("notify", "Tell", json!({"delay": 0})))
            .build()
            .unwrap();
        store.save_definition(&definition).await.unwrap();
        let record = store.create(definition.id).await.unwrap();

        let engine = ExecutionEngine::with_defaults(Arc::clone(&store));
        let outcome = engine.invoke(record.id).await.unwrap();
        assert_eq!(outcome, InvocationOutcome::Succeeded);
        assert_eq!(outcome.retry_delay(), None);

        let record = store.get(record.id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Success);
        assert!(record.claimed_by.is_none());
        assert!(record.finished_at.is_some());
    }
}
