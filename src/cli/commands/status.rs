//! `status` handler.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use console::style;
use std::sync::Arc;

use crate::domain::models::SupervisorState;
use crate::domain::ports::{StateStore, TaskQueue};
use crate::services::CircuitBreakerService;

pub async fn handle_status(
    state_store: Arc<dyn StateStore>,
    queue: Arc<dyn TaskQueue>,
    breakers: &CircuitBreakerService,
    provider_priority: &[String],
) -> Result<()> {
    let state = state_store.load().await.context("Failed to load state")?;
    let queue_len = queue.len().await.unwrap_or(0);

    println!("{}", style("Supervisor").bold());
    print_summary(&state, queue_len);

    let mut open_breakers = Vec::new();
    for provider in provider_priority {
        if let Ok(Some(status)) = breakers.status(provider).await {
            open_breakers.push(status);
        }
    }
    if !open_breakers.is_empty() {
        println!("\n{}", style("Open circuit breakers").bold());
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Provider", "Error", "Expires"]);
        for status in open_breakers {
            table.add_row(vec![
                Cell::new(&status.provider),
                Cell::new(&status.error_type),
                Cell::new(status.expires_at.to_rfc3339()),
            ]);
        }
        println!("{table}");
    }

    if !state.supervisor.active_sessions.is_empty() {
        println!("\n{}", style("Active sessions").bold());
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Feature", "Provider", "Session", "Tokens", "Errors"]);
        let mut sessions: Vec<_> = state.supervisor.active_sessions.iter().collect();
        sessions.sort_by(|a, b| a.0.cmp(b.0));
        for (feature, info) in sessions {
            table.add_row(vec![
                Cell::new(feature),
                Cell::new(&info.provider),
                Cell::new(&info.session_id),
                Cell::new(info.total_tokens),
                Cell::new(info.error_count),
            ]);
        }
        println!("{table}");
    }

    Ok(())
}

fn print_summary(state: &SupervisorState, queue_len: usize) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.add_row(vec![
        Cell::new("Status"),
        Cell::new(state.supervisor.status.as_str()),
    ]);
    table.add_row(vec![
        Cell::new("Iteration"),
        Cell::new(state.supervisor.iteration),
    ]);
    table.add_row(vec![
        Cell::new("Goal"),
        Cell::new(if state.goal.description.is_empty() {
            "<unset>"
        } else {
            state.goal.description.as_str()
        }),
    ]);
    table.add_row(vec![
        Cell::new("Goal completed"),
        Cell::new(state.goal.completed),
    ]);
    table.add_row(vec![Cell::new("Queue depth"), Cell::new(queue_len)]);
    table.add_row(vec![
        Cell::new("Queue exhausted"),
        Cell::new(state.queue.exhausted),
    ]);
    table.add_row(vec![
        Cell::new("Current task"),
        Cell::new(
            state
                .current_task
                .as_ref()
                .map_or("<none>", |t| t.task_id.as_str()),
        ),
    ]);
    table.add_row(vec![
        Cell::new("Completed tasks"),
        Cell::new(state.completed_tasks.len()),
    ]);
    table.add_row(vec![
        Cell::new("Blocked tasks"),
        Cell::new(state.blocked_tasks.len()),
    ]);
    if let Some(ref reason) = state.supervisor.halt_reason {
        table.add_row(vec![Cell::new("Halt reason"), Cell::new(reason)]);
    }
    if let Some(ref retry) = state.supervisor.resource_exhausted_retry {
        table.add_row(vec![
            Cell::new("Backoff"),
            Cell::new(format!(
                "attempt {} until {}",
                retry.attempt,
                retry.next_retry_at.to_rfc3339()
            )),
        ]);
    }
    table.add_row(vec![
        Cell::new("Last updated"),
        Cell::new(state.last_updated.to_rfc3339()),
    ]);
    println!("{table}");
}
