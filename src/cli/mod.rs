//! Operator CLI surface.
//!
//! Connection parameters are required on every command (env-backed); the
//! sandbox root alone carries a default. The queue database index must
//! differ from the state database index, enforced at connect time.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Deterministic control-plane supervisor for external AI coding agents.
#[derive(Parser)]
#[command(name = "foundry", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Store connection parameters. Required, with environment fallback.
#[derive(Debug, Clone, clap::Args)]
pub struct ConnectionArgs {
    /// Redis host.
    #[arg(long, env = "FOUNDRY_REDIS_HOST")]
    pub redis_host: String,

    /// Redis port.
    #[arg(long, env = "FOUNDRY_REDIS_PORT")]
    pub redis_port: u16,

    /// Key holding the supervisor state blob.
    #[arg(long, env = "FOUNDRY_STATE_KEY")]
    pub state_key: String,

    /// Database index for the state blob, breakers and cache.
    #[arg(long, env = "FOUNDRY_STATE_DB", default_value_t = 0)]
    pub state_db: u8,

    /// Queue name; the list lives under `queue:<name>`.
    #[arg(long, env = "FOUNDRY_QUEUE_NAME")]
    pub queue_name: String,

    /// Database index for the queue. Must differ from the state database.
    #[arg(long, env = "FOUNDRY_QUEUE_DB")]
    pub queue_db: u8,

    /// Root under which all task execution and logging is confined.
    #[arg(long, env = "FOUNDRY_SANDBOX_ROOT", default_value = "./sandbox")]
    pub sandbox_root: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize supervisor state. Fails if the key already exists.
    InitState {
        /// Execution mode: AUTO or MANUAL.
        #[arg(long, default_value = "AUTO")]
        execution_mode: String,
    },

    /// Set or update the goal description.
    SetGoal {
        /// Goal description.
        description: String,

        /// Project identifier; scopes the sandbox directory and logs.
        #[arg(long)]
        project_id: Option<String>,
    },

    /// Enqueue tasks from a JSON or YAML file (single object or array).
    Enqueue {
        /// Path to the task file.
        task_file: PathBuf,
    },

    /// Run the control loop until completion or halt.
    Start,

    /// Halt the supervisor. Never auto-resumed.
    Halt {
        /// Reason recorded in state and the audit log.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Resume a halted supervisor: status RUNNING, halt fields cleared.
    Resume,

    /// Print a human summary of supervisor state.
    Status,

    /// Print execution counters from state and the audit log.
    Metrics,
}
