// Command implementations

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use flowrun_core::{ExecutionSnapshot, NewStep, NewWorkflowDefinition};
use flowrun_durable::{
    ExecutionEngine, ExecutionService, InMemoryExecutionStore, InlineQueue,
    PostgresExecutionStore, StepRegistry, WorkerPool,
};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::WorkerConfig;

/// Workflow file accepted by `flowrun run`
#[derive(Debug, Deserialize)]
pub struct WorkflowFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<NewStep>,
}

impl WorkflowFile {
    pub fn into_definition(self, owner_id: Uuid) -> NewWorkflowDefinition {
        let definition = NewWorkflowDefinition::new(owner_id, self.name)
            .with_description(self.description);
        self.steps
            .into_iter()
            .fold(definition, |definition, step| definition.with_step(step))
    }
}

/// Parse a workflow file, picking the format from the extension
pub fn parse_workflow_file(path: &Path, content: &str) -> Result<WorkflowFile> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("json") => serde_json::from_str(content)
            .with_context(|| format!("Failed to parse JSON: {}", path.display())),
        Some("yaml") | Some("yml") => serde_yaml::from_str(content)
            .with_context(|| format!("Failed to parse YAML: {}", path.display())),
        _ => serde_yaml::from_str(content)
            .or_else(|_| serde_json::from_str(content))
            .with_context(|| {
                format!(
                    "Failed to parse file (tried YAML and JSON): {}",
                    path.display()
                )
            }),
    }
}

/// Run the Postgres-backed worker pool until ctrl-c
pub async fn serve(config: WorkerConfig) -> Result<()> {
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set to run the worker")?;

    let pool = PgPoolOptions::new()
        .max_connections((config.max_concurrent_executions as u32).saturating_mul(2).max(5))
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(PostgresExecutionStore::new(pool));
    store
        .migrate()
        .await
        .context("Failed to run database migrations")?;

    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&store),
        StepRegistry::default(),
        config.engine_config(),
    ));
    let workers = WorkerPool::new(engine, config.pool_config());

    info!(
        worker_id = %config.worker_id,
        max_concurrent = config.max_concurrent_executions,
        backoff_mode = %config.backoff_mode,
        "Starting worker"
    );
    workers.start().await.context("Failed to start worker pool")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    if let Err(e) = workers.shutdown().await {
        error!(error = %e, "Worker pool did not shut down cleanly");
        return Err(e.into());
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// Execute one workflow file in memory and print its final snapshot
pub async fn run(config: WorkerConfig, path: &Path, owner: Option<Uuid>) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let file = parse_workflow_file(path, &content)?;

    let owner_id = owner.unwrap_or_else(Uuid::now_v7);
    let store = Arc::new(InMemoryExecutionStore::new());
    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&store),
        StepRegistry::default(),
        config.engine_config(),
    ));
    let service = ExecutionService::new(store, Arc::new(InlineQueue::new(engine)));

    let definition = service
        .register_definition(file.into_definition(owner_id))
        .await
        .context("Invalid workflow definition")?;
    info!(workflow_id = %definition.id, name = %definition.name, "Running workflow");

    let execution = service
        .start_execution(definition.id, owner_id)
        .await
        .context("Execution did not complete")?;
    let snapshot = service.get_status(execution.id, owner_id).await?;

    print_snapshot(&snapshot)?;

    if let Some(message) = &snapshot.error_message {
        bail!("workflow failed: {}", message);
    }
    Ok(())
}

fn print_snapshot(snapshot: &ExecutionSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
name: nightly report
description: pull, crunch, tell
steps:
  - name: Pull CRM
    type: fetch
    config:
      source: crm
      delay: 0
  - name: Email team
    type: notify
"#;

    #[test]
    fn test_parse_yaml() {
        let file = parse_workflow_file(Path::new("report.yaml"), YAML).unwrap();
        assert_eq!(file.name, "nightly report");
        assert_eq!(file.steps.len(), 2);
        assert_eq!(file.steps[1].step_type, "notify");
        assert!(file.steps[1].config.is_null());
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"name": "n", "steps": [{"name": "s", "type": "infer", "config": {"model": "m"}}]}"#;
        let file = parse_workflow_file(Path::new("flow.JSON"), json).unwrap();
        assert_eq!(file.steps[0].config["model"], "m");
        assert!(file.description.is_empty());
    }

    #[test]
    fn test_unknown_extension_tries_both() {
        let file = parse_workflow_file(Path::new("flow.txt"), YAML).unwrap();
        assert_eq!(file.steps.len(), 2);

        let err = parse_workflow_file(Path::new("flow.txt"), "[not a workflow").unwrap_err();
        assert!(err.to_string().contains("tried YAML and JSON"));
    }

    #[test]
    fn test_into_definition_builds() {
        let file = parse_workflow_file(Path::new("report.yml"), YAML).unwrap();
        let owner = Uuid::now_v7();
        let definition = file.into_definition(owner).build().unwrap();
        assert_eq!(definition.owner_id, owner);
        assert_eq!(definition.steps[1].index, 1);
    }
}
