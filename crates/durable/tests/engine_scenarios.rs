//! End-to-end engine scenarios against the in-memory store
//!
//! Run with: cargo test -p flowrun-durable --test engine_scenarios

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use flowrun_durable::prelude::*;

// ============================================
// Helpers
// ============================================

/// Handler that always reports a transient failure
struct AlwaysFails;

#[async_trait]
impl StepHandler for AlwaysFails {
    async fn execute(&self, _config: &StepConfig) -> Result<StepResult, StepError> {
        Ok(StepResult::failure("downstream returned 503"))
    }
}

/// Handler that rejects its configuration
struct Misconfigured;

#[async_trait]
impl StepHandler for Misconfigured {
    async fn execute(&self, _config: &StepConfig) -> Result<StepResult, StepError> {
        Err(StepError::configuration("model 'ghost' is not deployed"))
    }
}

/// Handler that fails the first `failures` calls, then succeeds
struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

impl Flaky {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StepHandler for Flaky {
    async fn execute(&self, _config: &StepConfig) -> Result<StepResult, StepError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            Ok(StepResult::failure("warming up"))
        } else {
            Ok(StepResult::success("warm"))
        }
    }
}

/// `[fetch, process, infer, notify]` with the given per-step delay
fn four_step_definition(owner_id: Uuid, delay: f64) -> WorkflowDefinition {
    NewWorkflowDefinition::new(owner_id, "four steps")
        .with_step(NewStep::new("fetch", "Fetch", json!({"delay": delay})))
        .with_step(NewStep::new("process", "Process", json!({"delay": delay})))
        .with_step(NewStep::new("infer", "Infer", json!({"delay": delay})))
        .with_step(NewStep::new("notify", "Notify", json!({"delay": delay})))
        .build()
        .expect("valid definition")
}

async fn seed(store: &InMemoryExecutionStore, definition: &WorkflowDefinition) -> Uuid {
    store.save_definition(definition).await.unwrap();
    store.create(definition.id).await.unwrap().id
}

fn engine_with(
    store: &Arc<InMemoryExecutionStore>,
    registry: StepRegistry,
    config: EngineConfig,
) -> ExecutionEngine<InMemoryExecutionStore> {
    ExecutionEngine::new(Arc::clone(store), registry, config)
}

fn assert_finished_iff_terminal(snapshot: &ExecutionSnapshot) {
    assert_eq!(
        snapshot.finished_at.is_some(),
        snapshot.status.is_terminal(),
        "finished_at must be set exactly when {} is terminal",
        snapshot.status
    );
}

fn summary(snapshot: &ExecutionSnapshot) -> Vec<(u32, LogOutcome, u32)> {
    snapshot
        .logs
        .iter()
        .map(|l| (l.step_index, l.outcome, l.attempt))
        .collect()
}

// ============================================
// Happy Path
// ============================================

#[test_log::test(tokio::test)]
async fn test_all_steps_succeed() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;

    let engine = engine_with(&store, StepRegistry::default(), EngineConfig::default());
    let outcome = engine.invoke(execution_id).await.unwrap();
    assert_eq!(outcome, InvocationOutcome::Succeeded);

    let snapshot = store.get_status(execution_id).await.unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Success);
    assert_eq!(snapshot.current_step_index, 3);
    assert!(snapshot.started_at.is_some());
    assert!(snapshot.error_message.is_none());
    assert_finished_iff_terminal(&snapshot);

    assert_eq!(
        summary(&snapshot),
        vec![
            (0, LogOutcome::Success, 1),
            (1, LogOutcome::Success, 1),
            (2, LogOutcome::Success, 1),
            (3, LogOutcome::Success, 1),
        ]
    );
    assert_eq!(
        snapshot.logs[3].message,
        "Successfully sent notification via email to user@example.com"
    );
}

#[tokio::test]
async fn test_terminal_execution_is_untouched() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;

    let engine = engine_with(&store, StepRegistry::default(), EngineConfig::default());
    engine.invoke(execution_id).await.unwrap();
    let before = store.get_status(execution_id).await.unwrap();

    let outcome = engine.invoke(execution_id).await.unwrap();
    assert_eq!(
        outcome,
        InvocationOutcome::Skipped {
            status: ExecutionStatus::Success
        }
    );

    let after = store.get_status(execution_id).await.unwrap();
    assert_eq!(before, after);
}

// ============================================
// Retries and Failures
// ============================================

#[tokio::test(start_paused = true)]
async fn test_transient_failures_exhaust_attempts() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;

    let registry = StepRegistry::builder()
        .with_handler(StepType::Process, AlwaysFails)
        .build();
    let config = EngineConfig::default()
        .with_retry_policy(RetryPolicy::exponential().with_max_attempts(3));
    let engine = engine_with(&store, registry, config);

    let outcome = engine.invoke(execution_id).await.unwrap();
    assert!(matches!(
        outcome,
        InvocationOutcome::Failed { step_index: 1, .. }
    ));

    let snapshot = store.get_status(execution_id).await.unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(snapshot.current_step_index, 1);
    assert_finished_iff_terminal(&snapshot);

    assert_eq!(
        summary(&snapshot),
        vec![
            (0, LogOutcome::Success, 1),
            (1, LogOutcome::Retrying, 1),
            (1, LogOutcome::Retrying, 2),
            (1, LogOutcome::Failed, 3),
        ]
    );

    let last = snapshot.last_log().unwrap();
    assert_eq!(
        last.message,
        "Step failed after 3 attempts: downstream returned 503"
    );
    let error_message = snapshot.error_message.as_deref().unwrap();
    assert!(error_message.starts_with("Failed at step 1 (Process)"));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_schedule() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = NewWorkflowDefinition::new(Uuid::now_v7(), "one step")
        .with_step(NewStep::new("process", "Process", json!({"delay": 0})))
        .build()
        .unwrap();
    let execution_id = seed(&store, &definition).await;

    let registry = StepRegistry::builder()
        .with_handler(StepType::Process, AlwaysFails)
        .build();
    let engine = engine_with(&store, registry, EngineConfig::default());

    let start = tokio::time::Instant::now();
    engine.invoke(execution_id).await.unwrap();
    let elapsed = start.elapsed();

    // 60s + 120s + 240s between four attempts
    assert!(elapsed >= Duration::from_secs(420), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(421), "elapsed {:?}", elapsed);

    let logs = store.list_logs(execution_id).await.unwrap();
    assert_eq!(logs.len(), 4);
    assert_eq!(logs[3].outcome, LogOutcome::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;

    let registry = StepRegistry::builder()
        .with_handler(StepType::Infer, Flaky::new(2))
        .build();
    let engine = engine_with(&store, registry, EngineConfig::default());

    assert_eq!(
        engine.invoke(execution_id).await.unwrap(),
        InvocationOutcome::Succeeded
    );

    let snapshot = store.get_status(execution_id).await.unwrap();
    let infer_attempts: Vec<(LogOutcome, u32)> = snapshot
        .logs
        .iter()
        .filter(|l| l.step_index == 2)
        .map(|l| (l.outcome, l.attempt))
        .collect();
    assert_eq!(
        infer_attempts,
        vec![
            (LogOutcome::Retrying, 1),
            (LogOutcome::Retrying, 2),
            (LogOutcome::Success, 3),
        ]
    );

    // the attempt counter starts over on the next step
    let notify = snapshot.logs.iter().find(|l| l.step_index == 3).unwrap();
    assert_eq!(notify.attempt, 1);
}

#[tokio::test]
async fn test_configuration_error_short_circuits() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;

    let registry = StepRegistry::builder()
        .with_handler(StepType::Process, Misconfigured)
        .build();
    let engine = engine_with(&store, registry, EngineConfig::default());

    let outcome = engine.invoke(execution_id).await.unwrap();
    assert_eq!(
        outcome,
        InvocationOutcome::Failed {
            step_index: 1,
            reason: "model 'ghost' is not deployed".to_string()
        }
    );

    let snapshot = store.get_status(execution_id).await.unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(snapshot.current_step_index, 1);
    assert_eq!(
        summary(&snapshot),
        vec![(0, LogOutcome::Success, 1), (1, LogOutcome::Failed, 1)]
    );
    assert_eq!(snapshot.logs[1].message, "model 'ghost' is not deployed");
    assert!(snapshot.logs.iter().all(|l| l.step_index <= 1));
}

#[tokio::test]
async fn test_unknown_step_type_fails_before_running() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let mut definition = four_step_definition(Uuid::now_v7(), 0.0);
    definition.steps[2].step_type = "send_fax".to_string();
    let execution_id = seed(&store, &definition).await;

    let engine = engine_with(&store, StepRegistry::default(), EngineConfig::default());
    let outcome = engine.invoke(execution_id).await.unwrap();
    assert!(matches!(
        outcome,
        InvocationOutcome::Failed { step_index: 2, .. }
    ));

    let snapshot = store.get_status(execution_id).await.unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(snapshot.logs.len(), 1);
    assert_eq!(snapshot.logs[0].step_index, 2);
    assert_eq!(snapshot.logs[0].outcome, LogOutcome::Failed);
    assert!(snapshot.logs[0].message.contains("send_fax"));
    assert_finished_iff_terminal(&snapshot);
}

// ============================================
// Concurrency, Rescheduling and Recovery
// ============================================

#[tokio::test]
async fn test_concurrent_invocations_run_once() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.01);
    let execution_id = seed(&store, &definition).await;

    let first = engine_with(
        &store,
        StepRegistry::default(),
        EngineConfig::default().with_worker_id("first"),
    );
    let second = engine_with(
        &store,
        StepRegistry::default(),
        EngineConfig::default().with_worker_id("second"),
    );

    let (a, b) = futures::future::join(first.invoke(execution_id), second.invoke(execution_id)).await;
    let outcomes = [a.unwrap(), b.unwrap()];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == InvocationOutcome::Succeeded)
            .count(),
        1
    );

    let snapshot = store.get_status(execution_id).await.unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Success);
    let indices: Vec<u32> = snapshot.logs.iter().map(|l| l.step_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_live_lease_reports_busy() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;

    store
        .try_claim(execution_id, "elsewhere", Duration::from_secs(300))
        .await
        .unwrap();

    let engine = engine_with(&store, StepRegistry::default(), EngineConfig::default());
    let outcome = engine.invoke(execution_id).await.unwrap();
    assert_eq!(
        outcome,
        InvocationOutcome::Busy {
            holder: "elsewhere".to_string()
        }
    );
    assert!(store.list_logs(execution_id).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reschedule_mode_persists_retry() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;

    let registry = StepRegistry::builder()
        .with_handler(StepType::Process, Flaky::new(1))
        .build();
    let config = EngineConfig::default().with_backoff_mode(BackoffMode::Reschedule);
    let engine = engine_with(&store, registry, config);

    let outcome = engine.invoke(execution_id).await.unwrap();
    assert_eq!(
        outcome,
        InvocationOutcome::RetryScheduled {
            step_index: 1,
            attempt: 1,
            delay: Duration::from_secs(60),
        }
    );
    assert_eq!(outcome.retry_delay(), Some(Duration::from_secs(60)));

    let record = store.get(execution_id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Running);
    assert_eq!(record.current_step_index, 1);
    assert_eq!(record.step_attempt, 1);
    assert!(record.next_attempt_at.is_some());
    assert!(record.claimed_by.is_none());

    // invoked again before the retry is due: nothing runs
    let early = engine.invoke(execution_id).await.unwrap();
    match early {
        InvocationOutcome::RetryScheduled {
            step_index,
            attempt,
            delay,
        } => {
            assert_eq!((step_index, attempt), (1, 1));
            assert!(delay > Duration::ZERO && delay <= Duration::from_secs(60));
        }
        other => panic!("expected RetryScheduled, got {:?}", other),
    }
    assert_eq!(store.list_logs(execution_id).await.unwrap().len(), 2);
    assert!(store.get(execution_id).await.unwrap().claimed_by.is_none());

    tokio::time::sleep(Duration::from_secs(60)).await;
    let outcome = engine.invoke(execution_id).await.unwrap();
    assert_eq!(outcome, InvocationOutcome::Succeeded);

    let snapshot = store.get_status(execution_id).await.unwrap();
    let process: Vec<(LogOutcome, u32)> = snapshot
        .logs
        .iter()
        .filter(|l| l.step_index == 1)
        .map(|l| (l.outcome, l.attempt))
        .collect();
    assert_eq!(
        process,
        vec![(LogOutcome::Retrying, 1), (LogOutcome::Success, 2)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_deliveries_keep_the_backoff_schedule() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = NewWorkflowDefinition::new(Uuid::now_v7(), "one step")
        .with_step(NewStep::new("process", "Process", json!({"delay": 0})))
        .build()
        .unwrap();
    let execution_id = seed(&store, &definition).await;

    let registry = StepRegistry::builder()
        .with_handler(StepType::Process, AlwaysFails)
        .build();
    let config = EngineConfig::default().with_backoff_mode(BackoffMode::Reschedule);
    let engine = engine_with(&store, registry, config);

    for _ in 0..4 {
        let outcome = engine.invoke(execution_id).await.unwrap();
        assert!(matches!(
            outcome,
            InvocationOutcome::RetryScheduled { attempt: 1, .. }
        ));
    }
    let logs = store.list_logs(execution_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, LogOutcome::Retrying);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        engine.invoke(execution_id).await.unwrap(),
        InvocationOutcome::RetryScheduled {
            step_index: 0,
            attempt: 2,
            delay: Duration::from_secs(120),
        }
    );

    // 119s in, still one second short of attempt 3
    tokio::time::sleep(Duration::from_secs(119)).await;
    let early = engine.invoke(execution_id).await.unwrap();
    let remaining = early.retry_delay().unwrap();
    assert!(
        remaining > Duration::from_millis(990) && remaining <= Duration::from_secs(1),
        "remaining {:?}",
        remaining
    );
    assert_eq!(store.list_logs(execution_id).await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_in_process_engine_waits_out_pending_retry() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;

    let rescheduling = engine_with(
        &store,
        StepRegistry::builder()
            .with_handler(StepType::Fetch, Flaky::new(1))
            .build(),
        EngineConfig::default().with_backoff_mode(BackoffMode::Reschedule),
    );
    let sleeping = engine_with(&store, StepRegistry::default(), EngineConfig::default());

    assert!(matches!(
        rescheduling.invoke(execution_id).await.unwrap(),
        InvocationOutcome::RetryScheduled { attempt: 1, .. }
    ));

    let start = tokio::time::Instant::now();
    assert_eq!(
        sleeping.invoke(execution_id).await.unwrap(),
        InvocationOutcome::Succeeded
    );
    assert!(start.elapsed() >= Duration::from_secs(59), "elapsed {:?}", start.elapsed());

    let snapshot = store.get_status(execution_id).await.unwrap();
    assert_eq!(
        summary(&snapshot)[..2],
        [(0, LogOutcome::Retrying, 1), (0, LogOutcome::Success, 2)]
    );
}

#[tokio::test]
async fn test_slow_step_keeps_its_lease() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = NewWorkflowDefinition::new(Uuid::now_v7(), "slow")
        .with_step(NewStep::new("fetch", "Fetch", json!({"delay": 0.3})))
        .build()
        .unwrap();
    let execution_id = seed(&store, &definition).await;

    let ttl = Duration::from_millis(100);
    let first = engine_with(
        &store,
        StepRegistry::default(),
        EngineConfig::default().with_worker_id("a").with_claim_ttl(ttl),
    );
    let second = engine_with(
        &store,
        StepRegistry::default(),
        EngineConfig::default().with_worker_id("b").with_claim_ttl(ttl),
    );

    let (a, b) = tokio::join!(first.invoke(execution_id), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        second.invoke(execution_id).await
    });

    assert_eq!(a.unwrap(), InvocationOutcome::Succeeded);
    assert_eq!(
        b.unwrap(),
        InvocationOutcome::Busy {
            holder: "a".to_string()
        }
    );

    let snapshot = store.get_status(execution_id).await.unwrap();
    assert_eq!(summary(&snapshot), vec![(0, LogOutcome::Success, 1)]);
}

#[tokio::test]
async fn test_stolen_lease_aborts_invocation() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = NewWorkflowDefinition::new(Uuid::now_v7(), "slow")
        .with_step(NewStep::new("fetch", "Fetch", json!({"delay": 0.3})))
        .build()
        .unwrap();
    let execution_id = seed(&store, &definition).await;

    let engine = engine_with(
        &store,
        StepRegistry::default(),
        EngineConfig::default()
            .with_worker_id("a")
            .with_claim_ttl(Duration::from_millis(100)),
    );

    let (result, stolen) = tokio::join!(engine.invoke(execution_id), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.release_claim(execution_id, "a").await.unwrap();
        store
            .try_claim(execution_id, "intruder", Duration::from_secs(60))
            .await
            .unwrap()
    });
    assert!(matches!(stolen, ClaimOutcome::Claimed(_)));

    match result {
        Err(EngineError::LeaseLost {
            execution_id: lost,
            holder,
        }) => {
            assert_eq!(lost, execution_id);
            assert_eq!(holder, "intruder");
        }
        other => panic!("expected LeaseLost, got {:?}", other),
    }

    let record = store.get(execution_id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Running);
    assert!(record.finished_at.is_none());
    assert_eq!(record.claimed_by.as_deref(), Some("intruder"));
    assert!(store.list_logs(execution_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_after_crash() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;

    // a worker got through two steps and died holding an already expired lease
    store.mark_running(execution_id).await.unwrap();
    store.advance(execution_id, 2).await.unwrap();
    store
        .try_claim(execution_id, "crashed", Duration::ZERO)
        .await
        .unwrap();

    let dispatchable = store
        .list_dispatchable(chrono::Utc::now(), 10)
        .await
        .unwrap();
    assert!(dispatchable.contains(&execution_id));

    let engine = engine_with(&store, StepRegistry::default(), EngineConfig::default());
    assert_eq!(
        engine.invoke(execution_id).await.unwrap(),
        InvocationOutcome::Succeeded
    );

    let snapshot = store.get_status(execution_id).await.unwrap();
    let indices: Vec<u32> = snapshot.logs.iter().map(|l| l.step_index).collect();
    assert_eq!(indices, vec![2, 3]);
    assert_eq!(snapshot.current_step_index, 3);
}

#[tokio::test]
async fn test_deleted_execution_aborts_invocation() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;
    store.delete_definition(definition.id).await.unwrap();

    let engine = engine_with(&store, StepRegistry::default(), EngineConfig::default());
    let err = engine.invoke(execution_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(ref e) if e.is_not_found()));
}

// ============================================
// Worker Pool
// ============================================

async fn wait_until_terminal(store: &InMemoryExecutionStore, ids: &[Uuid]) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let mut done = true;
        for id in ids {
            if !store.get(*id).await.unwrap().is_terminal() {
                done = false;
            }
        }
        if done {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "executions did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[test_log::test(tokio::test)]
async fn test_worker_pool_runs_enqueued_executions() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let engine = Arc::new(ExecutionEngine::with_defaults(Arc::clone(&store)));
    let pool = Arc::new(WorkerPool::new(
        engine,
        WorkerPoolConfig::default().with_max_concurrency(2),
    ));
    pool.start().await.unwrap();

    let service = ExecutionService::new(Arc::clone(&store), Arc::clone(&pool));
    let owner = Uuid::now_v7();
    let definition = service
        .register_definition(
            NewWorkflowDefinition::new(owner, "pooled")
                .with_step(NewStep::new("fetch", "Fetch", json!({"delay": 0.01})))
                .with_step(NewStep::new("notify", "Notify", json!({"delay": 0.01}))),
        )
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(service.start_execution(definition.id, owner).await.unwrap().id);
    }
    wait_until_terminal(&store, &ids).await;

    for id in &ids {
        let snapshot = service.get_status(*id, owner).await.unwrap();
        assert_eq!(snapshot.status, ExecutionStatus::Success);
        assert_eq!(snapshot.logs.len(), 2);
    }
    assert_eq!(
        service.list_executions(definition.id, owner).await.unwrap().len(),
        3
    );

    pool.shutdown().await.unwrap();
    assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
    assert!(matches!(
        pool.enqueue(Uuid::now_v7()).await,
        Err(DispatchError::QueueClosed)
    ));
}

#[tokio::test]
async fn test_worker_pool_recovers_unqueued_executions() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;

    let engine = Arc::new(ExecutionEngine::with_defaults(Arc::clone(&store)));
    let pool = WorkerPool::new(
        engine,
        WorkerPoolConfig::default().with_recovery_interval(Duration::from_millis(50)),
    );
    pool.start().await.unwrap();
    assert!(matches!(pool.start().await, Err(WorkerPoolError::AlreadyRunning)));

    wait_until_terminal(&store, &[execution_id]).await;
    assert_eq!(
        store.get(execution_id).await.unwrap().status,
        ExecutionStatus::Success
    );

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_worker_pool_requeues_rescheduled_retries() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let definition = four_step_definition(Uuid::now_v7(), 0.0);
    let execution_id = seed(&store, &definition).await;

    let registry = StepRegistry::builder()
        .with_handler(StepType::Fetch, Flaky::new(2))
        .build();
    let config = EngineConfig::default()
        .with_backoff_mode(BackoffMode::Reschedule)
        .with_retry_policy(RetryPolicy::fixed(Duration::from_millis(50), 4));
    let engine = Arc::new(ExecutionEngine::new(Arc::clone(&store), registry, config));
    let pool = WorkerPool::new(engine, WorkerPoolConfig::default());
    pool.start().await.unwrap();

    pool.enqueue(execution_id).await.unwrap();
    wait_until_terminal(&store, &[execution_id]).await;

    let snapshot = store.get_status(execution_id).await.unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Success);
    let fetch_attempts: Vec<u32> = snapshot
        .logs
        .iter()
        .filter(|l| l.step_index == 0)
        .map(|l| l.attempt)
        .collect();
    assert_eq!(fetch_attempts, vec![1, 2, 3]);

    pool.shutdown().await.unwrap();
}
