//! Provider CLIs as child processes.

pub mod cli_provider;
pub mod registry;
pub mod spec;

pub use cli_provider::CliProvider;
pub use registry::ProviderRegistry;
pub use spec::ProviderSpec;
