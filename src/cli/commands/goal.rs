//! `set-goal` handler.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::domain::ports::StateStore;

pub async fn handle_set_goal(
    state_store: Arc<dyn StateStore>,
    description: String,
    project_id: Option<String>,
) -> Result<()> {
    let mut state = state_store.load().await.context("Failed to load state")?;
    state.goal.description = description;
    state.goal.completed = false;
    if project_id.is_some() {
        state.goal.project_id = project_id;
    }
    state_store
        .persist(&mut state)
        .await
        .context("Failed to persist goal")?;
    println!("Goal updated.");
    Ok(())
}
