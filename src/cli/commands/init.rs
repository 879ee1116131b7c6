//! `init-state` handler.

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use crate::domain::models::{Config, ExecutionMode, SupervisorState};
use crate::domain::ports::StateStore;

/// Create the initial state blob; fails if the key already exists.
///
/// Also scaffolds `.foundry/config.yaml` with defaults when absent so
/// subsequent runs are reproducible.
pub async fn handle_init(state_store: Arc<dyn StateStore>, execution_mode: &str) -> Result<()> {
    let Some(mode) = ExecutionMode::from_str(execution_mode) else {
        bail!("invalid execution mode '{execution_mode}'; expected AUTO or MANUAL");
    };

    let mut state = SupervisorState::new(mode);
    state_store
        .init(&mut state)
        .await
        .context("Failed to initialize state")?;

    scaffold_config().context("Failed to scaffold .foundry/config.yaml")?;

    println!("State initialized (mode {}).", mode.as_str());
    Ok(())
}

fn scaffold_config() -> Result<()> {
    let dir = std::path::Path::new(".foundry");
    let path = dir.join("config.yaml");
    if path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    let defaults = serde_yaml::to_string(&Config::default())?;
    std::fs::write(&path, defaults)?;
    println!("Wrote default configuration to {}.", path.display());
    Ok(())
}
