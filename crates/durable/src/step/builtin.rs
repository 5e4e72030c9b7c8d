//! Built-in simulated step handlers
//!
//! Each handler waits for the configured `delay` to stand in for the external
//! call and derives its message and data from the configuration alone, so the
//! same config always yields the same result.

use async_trait::async_trait;
use flowrun_core::{StepConfig, StepType};
use serde_json::json;
use tracing::debug;

use super::handler::{StepError, StepHandler, StepResult};

fn mismatched(expected: StepType, config: &StepConfig) -> StepError {
    StepError::configuration(format!(
        "{} handler received {} step config",
        expected,
        config.step_type()
    ))
}

/// Simulated data fetch
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchHandler;

#[async_trait]
impl StepHandler for FetchHandler {
    async fn execute(&self, config: &StepConfig) -> Result<StepResult, StepError> {
        let StepConfig::Fetch(fetch) = config else {
            return Err(mismatched(StepType::Fetch, config));
        };

        debug!(source = %fetch.source, "fetching data");
        tokio::time::sleep(config.delay()).await;

        Ok(
            StepResult::success(format!("Successfully fetched data from {}", fetch.source))
                .with_data(json!({
                    "source": fetch.source,
                    "data_size": fetch.expected_records,
                })),
        )
    }
}

/// Simulated data processing
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessHandler;

#[async_trait]
impl StepHandler for ProcessHandler {
    async fn execute(&self, config: &StepConfig) -> Result<StepResult, StepError> {
        let StepConfig::Process(process) = config else {
            return Err(mismatched(StepType::Process, config));
        };

        debug!(operation = %process.operation, "processing data");
        tokio::time::sleep(config.delay()).await;

        Ok(StepResult::success(format!(
            "Successfully processed data using {}",
            process.operation
        ))
        .with_data(json!({
            "operation": process.operation,
            "records_processed": process.records,
        })))
    }
}

/// Simulated model inference
#[derive(Debug, Default, Clone, Copy)]
pub struct InferHandler;

#[async_trait]
impl StepHandler for InferHandler {
    async fn execute(&self, config: &StepConfig) -> Result<StepResult, StepError> {
        let StepConfig::Infer(infer) = config else {
            return Err(mismatched(StepType::Infer, config));
        };

        debug!(model = %infer.model, "running inference");
        tokio::time::sleep(config.delay()).await;

        Ok(
            StepResult::success(format!("Successfully ran inference using {}", infer.model))
                .with_data(json!({
                    "model": infer.model,
                    "confidence": 0.95,
                    "predictions": infer.expected_predictions,
                })),
        )
    }
}

/// Simulated user notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyHandler;

#[async_trait]
impl StepHandler for NotifyHandler {
    async fn execute(&self, config: &StepConfig) -> Result<StepResult, StepError> {
        let StepConfig::Notify(notify) = config else {
            return Err(mismatched(StepType::Notify, config));
        };

        debug!(channel = %notify.channel, recipient = %notify.recipient, "sending notification");
        tokio::time::sleep(config.delay()).await;

        Ok(StepResult::success(format!(
            "Successfully sent notification via {} to {}",
            notify.channel, notify.recipient
        ))
        .with_data(json!({
            "channel": notify.channel,
            "recipient": notify.recipient,
        })))
    }
}
