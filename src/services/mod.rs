//! Service layer: the supervisor's moving parts, each owning one concern.

pub mod audit_log;
pub mod circuit_breaker;
pub mod command_runner;
pub mod dispatcher;
pub mod halt_detector;
pub mod helper_agent;
pub mod interrogator;
pub mod output_parser;
pub mod prompt_builder;
pub mod prompt_log;
pub mod recovery;
pub mod session_manager;
pub mod validator;

pub use audit_log::{scrub_secrets, AuditEntry, AuditEvent, AuditLogger};
pub use circuit_breaker::CircuitBreakerService;
pub use command_runner::{CommandOutcome, CommandRejection, CommandRunner};
pub use dispatcher::{DispatchOutcome, ProviderDispatcher, SessionHandle};
pub use halt_detector::{HaltClassification, HaltDetector};
pub use helper_agent::{HelperAgentDriver, HelperOutcome, HelperVerdictSource};
pub use interrogator::{InterrogationOutcome, Interrogator};
pub use output_parser::{AgentTrailer, OutputParser, ParseError, TrailerStatus};
pub use prompt_builder::{PromptBuilder, StateSnapshot};
pub use prompt_log::{PromptLogEntry, PromptLogType, PromptLogger};
pub use recovery::{RecoveryAction, RecoveryDetector, RecoveryKind, RecoveryScenario};
pub use session_manager::SessionManager;
pub use validator::Validator;
