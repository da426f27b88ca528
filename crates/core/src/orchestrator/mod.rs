//! Orchestration controllers.
//!
//! One controller per [`OrchestrationKey`](crate::key::OrchestrationKey)
//! drives a run: enumerate the source, fan out one worker per item, and
//! settle outcomes into a persisted [`OrchestrationState`](crate::state::OrchestrationState).

mod config;
mod controller;
mod registry;
mod scheduler;
mod types;

pub use config::OrchestratorConfig;
pub use controller::OrchestrationController;
pub use registry::{spawn_housekeeping, ControllerRegistry, OrchestrationSnapshot};
pub use scheduler::{fire, spawn_scheduler, ScheduleConfig, ScheduledJob};
pub use types::{
    Collaborators, ControllerDeps, OrchestratorError, RecoveryReport, StartOutcome,
};
