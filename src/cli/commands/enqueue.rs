//! `enqueue` handler.
//!
//! Accepts a single task object or an array, in JSON or YAML. Every task
//! must carry `task_id`, `instructions`, and `acceptance_criteria`.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::domain::models::Task;
use crate::domain::ports::TaskQueue;

pub async fn handle_enqueue(queue: Arc<dyn TaskQueue>, task_file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(task_file)
        .with_context(|| format!("Failed to read {}", task_file.display()))?;

    let value: Value = if task_file
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e, "yaml" | "yml"))
    {
        serde_yaml::from_str(&raw).context("Task file is not valid YAML")?
    } else {
        serde_json::from_str(&raw).context("Task file is not valid JSON")?
    };

    let entries: Vec<Value> = match value {
        Value::Array(entries) => entries,
        object @ Value::Object(_) => vec![object],
        _ => bail!("task file must contain a task object or an array of task objects"),
    };

    let mut tasks = Vec::with_capacity(entries.len());
    for entry in entries {
        for field in ["task_id", "instructions", "acceptance_criteria"] {
            if entry.get(field).is_none() {
                bail!("task is missing required field '{field}'");
            }
        }
        let task: Task =
            serde_json::from_value(entry).context("Task failed to decode")?;
        tasks.push(task);
    }

    for task in &tasks {
        queue
            .enqueue(task)
            .await
            .with_context(|| format!("Failed to enqueue task {}", task.task_id))?;
    }

    println!("Enqueued {} task(s).", tasks.len());
    Ok(())
}
