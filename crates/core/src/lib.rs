pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod key;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod state;
pub mod testing;
pub mod worker;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use coordinator::{ConcurrencyCoordinator, CoordinatorError, CoordinatorRegistry, Lease};
pub use key::OrchestrationKey;
pub use orchestrator::{
    ControllerRegistry, OrchestrationController, OrchestratorConfig, OrchestratorError,
    StartOutcome,
};
pub use state::{OrchestrationState, RunMode, SourceDescriptor};
