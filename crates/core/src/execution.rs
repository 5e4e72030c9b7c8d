//! Execution records, step logs and status snapshots

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an execution
///
/// `CREATED → RUNNING → {SUCCESS, FAILED}`. Terminal states never change;
/// running a workflow again creates a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Created,
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Outcome recorded for one step attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogOutcome {
    Success,
    Failed,
    /// The attempt failed and another one will follow
    Retrying,
}

impl LogOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Retrying => "RETRYING",
        }
    }
}

impl fmt::Display for LogOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogOutcome {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "RETRYING" => Ok(Self::Retrying),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A persisted status string outside the known set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized status value '{0}'")]
pub struct ParseStatusError(pub String);

/// One run of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub owner_id: Uuid,
    pub status: ExecutionStatus,

    /// Index of the step being attempted; never decreases
    pub current_step_index: u32,

    /// Attempts already recorded for the current step
    pub step_attempt: u32,

    /// When a rescheduled retry becomes due
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Final failure summary, set when the execution fails
    pub error_message: Option<String>,

    /// Invocation lease holder
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// A fresh CREATED record positioned at step 0
    pub fn new(workflow_id: Uuid, owner_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            owner_id,
            status: ExecutionStatus::Created,
            current_step_index: 0,
            step_attempt: 0,
            next_attempt_at: None,
            error_message: None,
            claimed_by: None,
            claim_expires_at: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether some invocation other than `owner` holds an unexpired lease
    pub fn is_claimed_by_other(&self, owner: &str, now: DateTime<Utc>) -> bool {
        match (&self.claimed_by, self.claim_expires_at) {
            (Some(holder), Some(expires_at)) => holder != owner && expires_at > now,
            _ => false,
        }
    }

    /// Whether a background dispatcher may pick this execution up at `now`
    pub fn is_dispatchable(&self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let lease_free = match self.claim_expires_at {
            Some(expires_at) => self.claimed_by.is_none() || expires_at <= now,
            None => true,
        };
        let retry_due = self.next_attempt_at.map_or(true, |due| due <= now);
        lease_free && retry_due
    }
}

/// Append-only record of one step attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLogEntry {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_index: u32,
    pub step_name: String,
    pub outcome: LogOutcome,
    pub message: String,

    /// Wall-clock time spent in the attempt
    #[serde(rename = "duration_seconds", with = "duration_seconds")]
    pub duration: Duration,

    /// 1-based, resets for every step
    pub attempt: u32,

    pub recorded_at: DateTime<Utc>,
}

impl StepLogEntry {
    pub fn new(
        execution_id: Uuid,
        step_index: u32,
        step_name: impl Into<String>,
        outcome: LogOutcome,
        message: impl Into<String>,
        duration: Duration,
        attempt: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            execution_id,
            step_index,
            step_name: step_name.into(),
            outcome,
            message: message.into(),
            duration,
            attempt,
            recorded_at: Utc::now(),
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}

/// Read-only view of an execution as of the latest committed state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub current_step_index: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub logs: Vec<StepLogEntry>,
}

impl ExecutionSnapshot {
    pub fn new(record: &ExecutionRecord, logs: Vec<StepLogEntry>) -> Self {
        Self {
            execution_id: record.id,
            workflow_id: record.workflow_id,
            status: record.status,
            current_step_index: record.current_step_index,
            started_at: record.started_at,
            finished_at: record.finished_at,
            error_message: record.error_message.clone(),
            logs,
        }
    }

    pub fn last_log(&self) -> Option<&StepLogEntry> {
        self.logs.last()
    }
}

/// Serde helper storing a `Duration` as fractional seconds
mod duration_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
