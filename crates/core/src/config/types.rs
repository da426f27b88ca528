use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::orchestrator::{OrchestratorConfig, ScheduleConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub backend: Option<BackendConfig>,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("sluice.db")
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

/// Concurrency coordinator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinatorConfig {
    /// How often expired leases are reclaimed (seconds).
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    /// Category name to total lease capacity.
    #[serde(default = "default_categories")]
    pub categories: BTreeMap<String, u32>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            reaper_interval_secs: default_reaper_interval(),
            categories: default_categories(),
        }
    }
}

fn default_reaper_interval() -> u64 {
    10
}

fn default_categories() -> BTreeMap<String, u32> {
    BTreeMap::from([("ingestion".to_string(), 4), ("validation".to_string(), 2)])
}

/// Index (vector store) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Embedding dimensions passed to `ensure_collection`.
    #[serde(default = "default_dimensions")]
    pub dimensions: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
        }
    }
}

fn default_dimensions() -> u32 {
    1536
}

/// Filesystem source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    /// Items are enumerated under `<root>/<category>/<qualifier>`.
    #[serde(default = "default_sources_root")]
    pub root: PathBuf,
    /// Items are copied here before processing.
    #[serde(default = "default_staging")]
    pub staging: PathBuf,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            root: default_sources_root(),
            staging: default_staging(),
        }
    }
}

fn default_sources_root() -> PathBuf {
    PathBuf::from("sources")
}

fn default_staging() -> PathBuf {
    PathBuf::from("staging")
}

/// Processing/indexing backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL (e.g., "http://localhost:7000")
    pub url: String,
    /// Bearer token sent with every request
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

fn default_backend_timeout() -> u64 {
    30
}

/// Notification dispatcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_buffer_size() -> usize {
    1000
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub coordinator: CoordinatorConfig,
    pub orchestrator: OrchestratorConfig,
    pub index: IndexConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<SanitizedBackendConfig>,
    pub notifications: NotificationsConfig,
    pub schedule: ScheduleConfig,
}

/// Sanitized backend config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedBackendConfig {
    pub url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            coordinator: config.coordinator.clone(),
            orchestrator: config.orchestrator.clone(),
            index: config.index.clone(),
            backend: config.backend.as_ref().map(|b| SanitizedBackendConfig {
                url: b.url.clone(),
                api_key_configured: b.api_key.as_deref().is_some_and(|k| !k.is_empty()),
                timeout_secs: b.timeout_secs,
            }),
            notifications: config.notifications.clone(),
            schedule: config.schedule.clone(),
        }
    }
}
