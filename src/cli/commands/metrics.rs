//! `metrics` handler.
//!
//! Counters from the state blob plus event totals from the per-project
//! audit file, which holds the full history the blob trims away.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::domain::ports::StateStore;
use crate::services::AuditLogger;

pub async fn handle_metrics(state_store: Arc<dyn StateStore>, sandbox_root: &Path) -> Result<()> {
    let state = state_store.load().await.context("Failed to load state")?;
    let project_id = state
        .goal
        .project_id
        .clone()
        .unwrap_or_else(|| "default".to_string());

    let audit = AuditLogger::for_project(sandbox_root, &project_id);
    let entries = audit.read_all().await.unwrap_or_default();

    let mut event_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for entry in &entries {
        *event_counts.entry(entry.event.as_str()).or_default() += 1;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec![
        Cell::new("Iterations"),
        Cell::new(state.supervisor.iteration),
    ]);
    table.add_row(vec![
        Cell::new("Completed (in memory)"),
        Cell::new(state.completed_tasks.len()),
    ]);
    table.add_row(vec![
        Cell::new("Blocked"),
        Cell::new(state.blocked_tasks.len()),
    ]);
    table.add_row(vec![
        Cell::new("Active sessions"),
        Cell::new(state.supervisor.active_sessions.len()),
    ]);
    table.add_row(vec![
        Cell::new("Audit entries"),
        Cell::new(entries.len()),
    ]);
    for (event, count) in event_counts {
        table.add_row(vec![Cell::new(format!("  {event}")), Cell::new(count)]);
    }
    println!("{table}");
    Ok(())
}
