//! foundry CLI entry point.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use foundry::application::LoopExit;
use foundry::cli::{commands, Cli, Commands};
use foundry::domain::SupervisorError;
use foundry::infrastructure::config::ConfigLoader;
use foundry::infrastructure::logging::LoggerImpl;
use foundry::infrastructure::redis::{
    RedisConnections, RedisSettings, RedisStateStore, RedisTaskQueue,
};
use foundry::services::CircuitBreakerService;

/// Reserved exit codes: 0 success/completed, 1 halt, 3 state missing,
/// 4 persist failure.
const EXIT_HALT: u8 = 1;
const EXIT_GENERIC: u8 = 2;
const EXIT_STATE_MISSING: u8 = 3;
const EXIT_PERSIST_FAILED: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ConfigLoader::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return ExitCode::from(EXIT_GENERIC);
        }
    };

    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Logger initialization failed: {e:#}");
            return ExitCode::from(EXIT_GENERIC);
        }
    };

    let settings = RedisSettings {
        host: cli.connection.redis_host.clone(),
        port: cli.connection.redis_port,
        state_db: cli.connection.state_db,
        queue_db: cli.connection.queue_db,
    };
    let connections = match RedisConnections::connect(&settings).await {
        Ok(connections) => connections,
        Err(e) => {
            eprintln!("Store connection failed: {e}");
            return ExitCode::from(EXIT_GENERIC);
        }
    };

    let state_store = Arc::new(RedisStateStore::new(
        connections.state(),
        &cli.connection.state_key,
    ));
    let queue = Arc::new(RedisTaskQueue::new(
        connections.queue(),
        &cli.connection.queue_name,
    ));
    let sandbox_root = cli.connection.sandbox_root.clone();

    let result = match cli.command {
        Commands::InitState { execution_mode } => {
            commands::init::handle_init(state_store, &execution_mode)
                .await
                .map(|()| LoopExit::Completed)
        }
        Commands::SetGoal {
            description,
            project_id,
        } => commands::goal::handle_set_goal(state_store, description, project_id)
            .await
            .map(|()| LoopExit::Completed),
        Commands::Enqueue { task_file } => commands::enqueue::handle_enqueue(queue, &task_file)
            .await
            .map(|()| LoopExit::Completed),
        Commands::Start => {
            commands::run::handle_start(state_store, queue, &connections, config, &sandbox_root)
                .await
        }
        Commands::Halt { reason } => commands::control::handle_halt(state_store, reason)
            .await
            .map(|()| LoopExit::Halted),
        Commands::Resume => commands::control::handle_resume(state_store)
            .await
            .map(|()| LoopExit::Completed),
        Commands::Status => {
            let breakers = CircuitBreakerService::new(
                Arc::new(foundry::infrastructure::redis::RedisBreakerStore::new(
                    connections.state(),
                )),
                config.providers.breaker_ttl_secs,
            );
            commands::status::handle_status(
                state_store,
                queue,
                &breakers,
                &config.providers.priority,
            )
            .await
            .map(|()| LoopExit::Completed)
        }
        Commands::Metrics => commands::metrics::handle_metrics(state_store, &sandbox_root)
            .await
            .map(|()| LoopExit::Completed),
    };

    match result {
        Ok(LoopExit::Completed) => ExitCode::SUCCESS,
        Ok(LoopExit::Halted) => ExitCode::from(EXIT_HALT),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(classify_exit(&e))
        }
    }
}

/// Map error kinds onto the reserved exit codes.
fn classify_exit(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<SupervisorError>() {
        Some(SupervisorError::StateNotFound) => EXIT_STATE_MISSING,
        Some(SupervisorError::StatePersistFailed(_)) => EXIT_PERSIST_FAILED,
        Some(e) if e.is_fatal() => EXIT_HALT,
        _ => EXIT_GENERIC,
    }
}
