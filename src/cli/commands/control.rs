//! `halt` and `resume` handlers.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::domain::models::SupervisorStatus;
use crate::domain::ports::StateStore;

pub async fn handle_halt(state_store: Arc<dyn StateStore>, reason: Option<String>) -> Result<()> {
    let mut state = state_store.load().await.context("Failed to load state")?;
    let reason = reason.unwrap_or_else(|| "OPERATOR_HALT".to_string());
    state.halt(&reason, "halted by operator");
    state_store
        .persist(&mut state)
        .await
        .context("Failed to persist halt")?;
    println!("Supervisor halted ({reason}).");
    Ok(())
}

pub async fn handle_resume(state_store: Arc<dyn StateStore>) -> Result<()> {
    let mut state = state_store.load().await.context("Failed to load state")?;
    if state.supervisor.status == SupervisorStatus::Running {
        println!("Supervisor is already running.");
        return Ok(());
    }
    state.resume();
    state_store
        .persist(&mut state)
        .await
        .context("Failed to persist resume")?;
    println!("Supervisor resumed.");
    Ok(())
}
