//! Worker pool for execution invocations
//!
//! Runs engine invocations with bounded concurrency, re-enqueues rescheduled
//! retries after their delay, recovers abandoned executions and shuts down
//! gracefully.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::dispatch::{DispatchError, ExecutionQueue};
use crate::engine::{ExecutionEngine, InvocationOutcome};
use crate::persistence::{ExecutionStore, StoreError};
use crate::reliability::duration_millis;

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent invocations
    pub max_concurrency: usize,

    /// Capacity of the local enqueue channel
    pub queue_capacity: usize,

    /// How often the store is scanned for dispatchable executions
    #[serde(with = "duration_millis")]
    pub recovery_interval: Duration,

    /// Maximum executions picked up per recovery scan
    pub recovery_batch_size: usize,

    /// Graceful shutdown timeout
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            queue_capacity: 1024,
            recovery_interval: Duration::from_secs(5),
            recovery_batch_size: 100,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set the local queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the recovery scan interval
    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Created, not started yet
    Starting,
    /// Running and accepting executions
    Running,
    /// Draining (finishing current invocations, not accepting new ones)
    Draining,
    /// Stopped
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Pool already started (a pool runs once)
    #[error("worker pool has already been started")]
    AlreadyRunning,

    /// Pool not running
    #[error("worker pool is not running")]
    NotRunning,

    /// Shutdown timeout
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// State shared between the pool handle and its background tasks
struct Shared<S: ExecutionStore> {
    engine: Arc<ExecutionEngine<S>>,
    sender: mpsc::Sender<Uuid>,
    in_flight: Mutex<HashSet<Uuid>>,
    active: Arc<Semaphore>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: ExecutionStore> Shared<S> {
    fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Re-enqueue `execution_id` once `delay` has passed, unless shutting down
    fn enqueue_later(self: &Arc<Self>, execution_id: Uuid, delay: Duration) {
        let shared = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if shared.sender.send(execution_id).await.is_err() {
                        debug!(%execution_id, "queue closed before delayed enqueue");
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!(%execution_id, "delayed enqueue dropped by shutdown");
                }
            }
        });
    }

    /// Start an invocation unless one is already in flight on this pool
    async fn dispatch(self: &Arc<Self>, execution_id: Uuid) -> bool {
        if !self.in_flight.lock().insert(execution_id) {
            debug!(%execution_id, "execution already in flight");
            return true;
        }

        let permit = match Arc::clone(&self.active).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.in_flight.lock().remove(&execution_id);
                return false;
            }
        };

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = shared.engine.invoke(execution_id).await;
            shared.in_flight.lock().remove(&execution_id);

            match outcome {
                Ok(InvocationOutcome::RetryScheduled { delay, .. }) => {
                    shared.enqueue_later(execution_id, delay);
                }
                Ok(outcome) => {
                    debug!(%execution_id, ?outcome, "invocation finished");
                }
                Err(e) => {
                    error!(%execution_id, "Invocation failed: {}", e);
                }
            }

            drop(permit);
        });

        true
    }
}

/// Worker pool for executing workflow runs
///
/// # Example
///
/// ```ignore
/// use flowrun_durable::worker::{WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(engine, WorkerPoolConfig::default().with_max_concurrency(10));
///
/// pool.start().await?;
/// pool.enqueue(execution_id).await?;
///
/// // ... later, graceful shutdown
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool<S: ExecutionStore> {
    shared: Arc<Shared<S>>,
    config: WorkerPoolConfig,
    receiver: Mutex<Option<mpsc::Receiver<Uuid>>>,
    shutdown_tx: watch::Sender<bool>,
    status: RwLock<WorkerPoolStatus>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
    recovery_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S: ExecutionStore> WorkerPool<S> {
    /// Create a new worker pool
    pub fn new(engine: Arc<ExecutionEngine<S>>, mut config: WorkerPoolConfig) -> Self {
        // deserialized configs skip the builder clamps
        config.max_concurrency = config.max_concurrency.max(1);
        config.recovery_interval = config.recovery_interval.max(Duration::from_millis(1));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));

        let shared = Arc::new(Shared {
            engine,
            sender,
            in_flight: Mutex::new(HashSet::new()),
            active: Arc::new(Semaphore::new(config.max_concurrency)),
            shutdown_rx,
        });

        Self {
            shared,
            config,
            receiver: Mutex::new(Some(receiver)),
            shutdown_tx,
            status: RwLock::new(WorkerPoolStatus::Starting),
            dispatch_handle: Mutex::new(None),
            recovery_handle: Mutex::new(None),
        }
    }

    /// Start the worker pool
    #[instrument(skip(self), fields(worker_id = %self.worker_id()))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(WorkerPoolError::AlreadyRunning)?;

        info!(
            worker_id = %self.worker_id(),
            max_concurrency = self.config.max_concurrency,
            "Starting worker pool"
        );

        *self.status.write() = WorkerPoolStatus::Running;

        self.start_dispatch_loop(receiver);
        self.start_recovery_loop();

        Ok(())
    }

    /// Shutdown the worker pool gracefully
    #[instrument(skip(self), fields(worker_id = %self.worker_id()))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        match self.status() {
            WorkerPoolStatus::Stopped => return Ok(()),
            WorkerPoolStatus::Starting => return Err(WorkerPoolError::NotRunning),
            WorkerPoolStatus::Running | WorkerPoolStatus::Draining => {}
        }

        info!(worker_id = %self.worker_id(), "Initiating graceful shutdown");

        *self.status.write() = WorkerPoolStatus::Draining;
        let _ = self.shutdown_tx.send(true);

        // the dispatch loop may be parked on a permit; running invocations are
        // separate tasks and keep going
        for handle in [
            self.dispatch_handle.lock().take(),
            self.recovery_handle.lock().take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }

        // Wait for in-flight invocations (with timeout)
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;

        loop {
            let available = self.shared.active.available_permits();
            if available == self.config.max_concurrency {
                debug!("All invocations completed");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.config.max_concurrency - available,
                    "Shutdown timeout reached"
                );
                return Err(WorkerPoolError::ShutdownTimeout);
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        *self.status.write() = WorkerPoolStatus::Stopped;

        info!(worker_id = %self.worker_id(), "Worker pool stopped");
        Ok(())
    }

    /// Get current status
    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    /// Number of invocations currently running
    pub fn current_load(&self) -> usize {
        self.config.max_concurrency - self.shared.active.available_permits()
    }

    /// Lease owner name used by this pool's engine
    pub fn worker_id(&self) -> &str {
        &self.shared.engine.config().worker_id
    }

    /// Check if accepting executions
    pub fn is_accepting(&self) -> bool {
        matches!(
            self.status(),
            WorkerPoolStatus::Starting | WorkerPoolStatus::Running
        )
    }

    fn start_dispatch_loop(&self, mut receiver: mpsc::Receiver<Uuid>) {
        let shared = Arc::clone(&self.shared);
        let mut shutdown_rx = self.shared.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = receiver.recv() => {
                        let Some(execution_id) = received else {
                            break;
                        };
                        if !shared.dispatch(execution_id).await {
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Dispatch loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Dispatch loop exited");
        });

        *self.dispatch_handle.lock() = Some(handle);
    }

    fn start_recovery_loop(&self) {
        let shared = Arc::clone(&self.shared);
        let interval = self.config.recovery_interval;
        let batch_size = self.config.recovery_batch_size;
        let mut shutdown_rx = self.shared.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let store = shared.engine.store();
                        match store.list_dispatchable(shared.engine.now(), batch_size).await {
                            Ok(ids) => {
                                let mut recovered = 0;
                                for execution_id in ids {
                                    if shared.in_flight.lock().contains(&execution_id) {
                                        continue;
                                    }
                                    if shared.sender.try_send(execution_id).is_err() {
                                        debug!("Recovery: local queue full");
                                        break;
                                    }
                                    recovered += 1;
                                }
                                if recovered > 0 {
                                    info!(count = recovered, "Recovered dispatchable executions");
                                }
                            }
                            Err(e) => {
                                error!("Recovery scan failed: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Recovery loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Recovery loop exited");
        });

        *self.recovery_handle.lock() = Some(handle);
    }
}

#[async_trait]
impl<S: ExecutionStore> ExecutionQueue for WorkerPool<S> {
    async fn enqueue(&self, execution_id: Uuid) -> Result<(), DispatchError> {
        if !self.is_accepting() || self.shared.is_shutting_down() {
            return Err(DispatchError::QueueClosed);
        }
        self.shared
            .sender
            .send(execution_id)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }

    async fn enqueue_after(
        &self,
        execution_id: Uuid,
        delay: Duration,
    ) -> Result<(), DispatchError> {
        if !self.is_accepting() || self.shared.is_shutting_down() {
            return Err(DispatchError::QueueClosed);
        }
        self.shared.enqueue_later(execution_id, delay);
        Ok(())
    }
}
