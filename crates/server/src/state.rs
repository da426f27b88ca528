use std::sync::Arc;

use sluice_core::notify::NotificationStore;
use sluice_core::{Config, ControllerRegistry, CoordinatorRegistry, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    registry: Arc<ControllerRegistry>,
    coordinators: Arc<CoordinatorRegistry>,
    notification_store: Arc<dyn NotificationStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Arc<ControllerRegistry>,
        coordinators: Arc<CoordinatorRegistry>,
        notification_store: Arc<dyn NotificationStore>,
    ) -> Self {
        Self {
            config,
            registry,
            coordinators,
            notification_store,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn registry(&self) -> &ControllerRegistry {
        self.registry.as_ref()
    }

    pub fn coordinators(&self) -> &CoordinatorRegistry {
        self.coordinators.as_ref()
    }

    pub fn notification_store(&self) -> &dyn NotificationStore {
        self.notification_store.as_ref()
    }
}
