// Worker configuration
//
// Design Decision: Numeric settings fall back to their defaults when unset or
// unparsable; an unknown BACKOFF_MODE is an error.

use std::time::Duration;

use anyhow::{anyhow, Result};
use flowrun_durable::{BackoffMode, EngineConfig, RetryPolicy, WorkerPoolConfig};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: Option<String>,
    pub worker_id: String,
    pub max_concurrent_executions: usize,
    pub max_step_attempts: u32,
    pub backoff_initial: Duration,
    pub backoff_mode: BackoffMode,
    pub claim_ttl: Duration,
    pub recovery_interval: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };

        let backoff_mode = match lookup("BACKOFF_MODE") {
            Some(raw) => raw
                .parse()
                .map_err(|e: String| anyhow!("BACKOFF_MODE: {}", e))?,
            None => BackoffMode::default(),
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            worker_id: lookup("WORKER_ID").unwrap_or_else(|| format!("worker-{}", Uuid::now_v7())),
            max_concurrent_executions: number("MAX_CONCURRENT_EXECUTIONS", 10).max(1) as usize,
            max_step_attempts: number("MAX_STEP_ATTEMPTS", 4).max(1) as u32,
            backoff_initial: Duration::from_secs(number("BACKOFF_INITIAL_SECS", 60)),
            backoff_mode,
            claim_ttl: Duration::from_secs(number("CLAIM_TTL_SECS", 300)),
            recovery_interval: Duration::from_secs(number("RECOVERY_INTERVAL_SECS", 5).max(1)),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        let retry = RetryPolicy::exponential()
            .with_max_attempts(self.max_step_attempts)
            .with_base_delay(self.backoff_initial);

        EngineConfig::default()
            .with_worker_id(self.worker_id.clone())
            .with_retry_policy(retry)
            .with_backoff_mode(self.backoff_mode)
            .with_claim_ttl(self.claim_ttl)
    }

    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::default()
            .with_max_concurrency(self.max_concurrent_executions)
            .with_recovery_interval(self.recovery_interval)
    }
}
