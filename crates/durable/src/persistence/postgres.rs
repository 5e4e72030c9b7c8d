//! PostgreSQL implementation of ExecutionStore
//!
//! Production persistence using PostgreSQL with:
//! - Conditional `UPDATE ... RETURNING` for every state transition
//! - Lease-based invocation claims that expire when a worker dies
//! - Repeatable-read snapshots for status queries

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowrun_core::{
    ExecutionRecord, ExecutionSnapshot, ExecutionStatus, LogOutcome, StepLogEntry, StepSpec,
    WorkflowDefinition,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;

/// PostgreSQL implementation of ExecutionStore
///
/// # Example
///
/// ```ignore
/// use flowrun_durable::PostgresExecutionStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/flowrun").await?;
/// let store = PostgresExecutionStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresExecutionStore {
    pool: PgPool,
}

impl PostgresExecutionStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                StoreError::Database(e.to_string())
            })
    }

    /// Turn a conditional update that matched no row into the right error
    async fn stale_or_missing(
        &self,
        execution_id: Uuid,
        reason: impl FnOnce(&ExecutionRecord) -> String,
    ) -> StoreError {
        match self.get(execution_id).await {
            Ok(record) => StoreError::stale(execution_id, reason(&record)),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl ExecutionStore for PostgresExecutionStore {
    #[instrument(skip(self, definition), fields(definition_id = %definition.id))]
    async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), StoreError> {
        let steps = serde_json::to_value(&definition.steps)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_definitions (id, owner_id, name, description, steps, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(definition.id)
        .bind(definition.owner_id)
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(&steps)
        .bind(definition.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save definition: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(definition_id = %definition.id, steps = definition.steps.len(), "saved definition");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_definition(&self, definition_id: Uuid) -> Result<WorkflowDefinition, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, name, description, steps, created_at
            FROM workflow_definitions
            WHERE id = $1
            "#,
        )
        .bind(definition_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get definition: {}", e);
            StoreError::Database(e.to_string())
        })?
        .ok_or(StoreError::DefinitionNotFound(definition_id))?;

        let steps_json: serde_json::Value = row.get("steps");
        let steps: Vec<StepSpec> = serde_json::from_value(steps_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(WorkflowDefinition {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            name: row.get("name"),
            description: row.get("description"),
            steps,
            created_at: row.get("created_at"),
        })
    }

    #[instrument(skip(self))]
    async fn delete_definition(&self, definition_id: Uuid) -> Result<(), StoreError> {
        // executions and logs go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM workflow_definitions WHERE id = $1")
            .bind(definition_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete definition: {}", e);
                StoreError::Database(e.to_string())
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DefinitionNotFound(definition_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create(&self, definition_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_executions (id, workflow_id, owner_id, status, created_at)
            SELECT $1, d.id, d.owner_id, 'CREATED', $2
            FROM workflow_definitions d
            WHERE d.id = $3
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(Utc::now())
        .bind(definition_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create execution: {}", e);
            StoreError::Database(e.to_string())
        })?
        .ok_or(StoreError::DefinitionNotFound(definition_id))?;

        let record = execution_from_row(&row)?;
        debug!(execution_id = %record.id, %definition_id, "created execution");
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn get(&self, execution_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = $1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get execution: {}", e);
                StoreError::Database(e.to_string())
            })?
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        execution_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn advance(
        &self,
        execution_id: Uuid,
        new_index: u32,
    ) -> Result<ExecutionRecord, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET current_step_index = $2,
                step_attempt = 0,
                next_attempt_at = NULL
            WHERE id = $1
              AND current_step_index < $2
              AND status IN ('CREATED', 'RUNNING')
            RETURNING *
            "#,
        )
        .bind(execution_id)
        .bind(new_index as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to advance execution: {}", e);
            StoreError::Database(e.to_string())
        })?;

        match row {
            Some(row) => execution_from_row(&row),
            None => Err(self
                .stale_or_missing(execution_id, |r| {
                    format!(
                        "cannot advance {} execution at step {} to step {}",
                        r.status, r.current_step_index, new_index
                    )
                })
                .await),
        }
    }

    #[instrument(skip(self))]
    async fn mark_running(&self, execution_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = 'RUNNING',
                started_at = COALESCE(started_at, $2)
            WHERE id = $1
              AND status IN ('CREATED', 'RUNNING')
            RETURNING *
            "#,
        )
        .bind(execution_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to mark execution running: {}", e);
            StoreError::Database(e.to_string())
        })?;

        match row {
            Some(row) => execution_from_row(&row),
            None => Err(self
                .stale_or_missing(execution_id, |r| {
                    format!("cannot start a {} execution", r.status)
                })
                .await),
        }
    }

    #[instrument(skip(self, error_message))]
    async fn mark_terminal(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> Result<ExecutionRecord, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::stale(
                execution_id,
                format!("{} is not a terminal status", status),
            ));
        }

        let row = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2,
                finished_at = $3,
                error_message = $4,
                next_attempt_at = NULL,
                claimed_by = NULL,
                claim_expires_at = NULL
            WHERE id = $1
              AND status IN ('CREATED', 'RUNNING')
            RETURNING *
            "#,
        )
        .bind(execution_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(&error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to finalize execution: {}", e);
            StoreError::Database(e.to_string())
        })?;

        match row {
            Some(row) => {
                debug!(%execution_id, %status, "finalized execution");
                execution_from_row(&row)
            }
            None => Err(self
                .stale_or_missing(execution_id, |r| format!("execution already {}", r.status))
                .await),
        }
    }

    #[instrument(skip(self))]
    async fn record_attempt(
        &self,
        execution_id: Uuid,
        step_index: u32,
        attempt: u32,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<ExecutionRecord, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET step_attempt = $3,
                next_attempt_at = $4
            WHERE id = $1
              AND current_step_index = $2
              AND status IN ('CREATED', 'RUNNING')
            RETURNING *
            "#,
        )
        .bind(execution_id)
        .bind(step_index as i32)
        .bind(attempt as i32)
        .bind(next_attempt_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to record attempt: {}", e);
            StoreError::Database(e.to_string())
        })?;

        match row {
            Some(row) => execution_from_row(&row),
            None => Err(self
                .stale_or_missing(execution_id, |r| {
                    format!(
                        "attempt for step {} does not match {} execution at step {}",
                        step_index, r.status, r.current_step_index
                    )
                })
                .await),
        }
    }

    #[instrument(skip(self))]
    async fn list_executions(
        &self,
        definition_id: Uuid,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT *
            FROM workflow_executions
            WHERE workflow_id = $1
            ORDER BY started_at DESC NULLS FIRST, created_at DESC, id DESC
            "#,
        )
        .bind(definition_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list executions: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(execution_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn try_claim(
        &self,
        execution_id: Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        let now = Utc::now();

        let row = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET claimed_by = $2,
                claim_expires_at = $3
            WHERE id = $1
              AND (claimed_by IS NULL
                   OR claimed_by = $2
                   OR claim_expires_at IS NULL
                   OR claim_expires_at <= $4)
            RETURNING *
            "#,
        )
        .bind(execution_id)
        .bind(owner)
        .bind(lease_expiry(now, ttl))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim execution: {}", e);
            StoreError::Database(e.to_string())
        })?;

        match row {
            Some(row) => Ok(ClaimOutcome::Claimed(execution_from_row(&row)?)),
            None => {
                let record = self.get(execution_id).await?;
                Ok(ClaimOutcome::Busy {
                    holder: record.claimed_by.unwrap_or_default(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn release_claim(&self, execution_id: Uuid, owner: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET claimed_by = NULL,
                claim_expires_at = NULL
            WHERE id = $1 AND claimed_by = $2
            "#,
        )
        .bind(execution_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to release claim: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            // not ours (or already released); only a missing row is an error
            self.get(execution_id).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM workflow_executions
            WHERE status IN ('CREATED', 'RUNNING')
              AND (claimed_by IS NULL OR claim_expires_at IS NULL OR claim_expires_at <= $1)
              AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
            ORDER BY created_at, id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list dispatchable executions: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    #[instrument(skip(self, entry), fields(execution_id = %entry.execution_id, step_index = entry.step_index))]
    async fn append_log(&self, entry: &StepLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs
                (id, execution_id, step_index, step_name, outcome, message,
                 duration_seconds, attempt, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(entry.execution_id)
        .bind(entry.step_index as i32)
        .bind(&entry.step_name)
        .bind(entry.outcome.as_str())
        .bind(&entry.message)
        .bind(entry.duration_seconds())
        .bind(entry.attempt as i32)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::ExecutionNotFound(entry.execution_id)
            }
            other => {
                error!("Failed to append log: {}", other);
                StoreError::Database(other.to_string())
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<StepLogEntry>, StoreError> {
        // distinguishes "no logs yet" from "no such execution"
        self.get(execution_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT *
            FROM execution_logs
            WHERE execution_id = $1
            ORDER BY recorded_at, seq
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list logs: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(log_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn get_status(&self, execution_id: Uuid) -> Result<ExecutionSnapshot, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = $1")
            .bind(execution_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;
        let record = execution_from_row(&row)?;

        let log_rows = sqlx::query(
            r#"
            SELECT *
            FROM execution_logs
            WHERE execution_id = $1
            ORDER BY recorded_at, seq
            "#,
        )
        .bind(execution_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        let logs = log_rows
            .iter()
            .map(log_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(ExecutionSnapshot::new(&record, logs))
    }
}

fn execution_from_row(row: &PgRow) -> Result<ExecutionRecord, StoreError> {
    let status: String = row.get("status");

    Ok(ExecutionRecord {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        owner_id: row.get("owner_id"),
        status: status
            .parse()
            .map_err(|e: flowrun_core::ParseStatusError| StoreError::Serialization(e.to_string()))?,
        current_step_index: row.get::<i32, _>("current_step_index") as u32,
        step_attempt: row.get::<i32, _>("step_attempt") as u32,
        next_attempt_at: row.get("next_attempt_at"),
        error_message: row.get("error_message"),
        claimed_by: row.get("claimed_by"),
        claim_expires_at: row.get("claim_expires_at"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    })
}

fn log_from_row(row: &PgRow) -> Result<StepLogEntry, StoreError> {
    let outcome: String = row.get("outcome");
    let outcome: LogOutcome = outcome
        .parse()
        .map_err(|e: flowrun_core::ParseStatusError| StoreError::Serialization(e.to_string()))?;
    let duration = Duration::try_from_secs_f64(row.get("duration_seconds"))
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(StepLogEntry {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        step_index: row.get::<i32, _>("step_index") as u32,
        step_name: row.get("step_name"),
        outcome,
        message: row.get("message"),
        duration,
        attempt: row.get::<i32, _>("attempt") as u32,
        recorded_at: row.get("recorded_at"),
    })
}
