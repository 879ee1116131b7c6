//! `start` handler: wire the services and run the loop.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::application::{ControlLoop, LoopExit};
use crate::domain::models::Config;
use crate::domain::ports::{StateStore, TaskQueue};
use crate::infrastructure::ast::AstRegistry;
use crate::infrastructure::providers::ProviderRegistry;
use crate::infrastructure::redis::{RedisBreakerStore, RedisConnections, RedisValidationCache};
use crate::services::{
    CircuitBreakerService, HelperAgentDriver, ProviderDispatcher, SessionManager, Validator,
};

/// Build the control loop against live Redis connections and run it.
pub async fn handle_start(
    state_store: Arc<dyn StateStore>,
    queue: Arc<dyn TaskQueue>,
    connections: &RedisConnections,
    config: Config,
    sandbox_root: &Path,
) -> Result<LoopExit> {
    let registry = ProviderRegistry::from_config(&config.providers)
        .context("Failed to build provider registry")?;
    let breakers = CircuitBreakerService::new(
        Arc::new(RedisBreakerStore::new(connections.state())),
        config.providers.breaker_ttl_secs,
    );
    let dispatcher = ProviderDispatcher::new(
        registry,
        breakers,
        Duration::from_secs(config.providers.invocation_timeout_secs),
    );
    let validator = Validator::new(
        Arc::new(RedisValidationCache::new(connections.state())),
        AstRegistry::with_builtin(),
        config.validation.cache_ttl_secs,
    );
    let helper = HelperAgentDriver::new(config.helper.clone());
    let session_manager = SessionManager::new(config.session.clone());

    // Cancel is observed between iterations; the in-flight subprocess
    // finishes and the iteration persists before exit.
    let shutdown = Arc::new(AtomicBool::new(false));
    let signal_flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Cancel requested; finishing the current iteration");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let control_loop = ControlLoop::new(
        state_store,
        queue,
        dispatcher,
        validator,
        helper,
        session_manager,
        config,
        sandbox_root.to_path_buf(),
        shutdown,
    );

    control_loop.run().await.context("Control loop failed")
}
