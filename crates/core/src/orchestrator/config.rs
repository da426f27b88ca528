//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by every orchestration controller and item worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Coordinator category item workers lease from.
    #[serde(default = "default_lease_category")]
    pub lease_category: String,

    /// Weight of one item's lease.
    #[serde(default = "default_item_lease_weight")]
    pub item_lease_weight: u32,

    /// How long one acquire call may wait in the queue (seconds).
    #[serde(default = "default_lease_wait_timeout")]
    pub lease_wait_timeout_secs: u64,

    /// Lease TTL (seconds). Leases older than this are reclaimed.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    /// Acquire calls per item attempt before reporting a transient failure.
    #[serde(default = "default_lease_acquire_attempts")]
    pub lease_acquire_attempts: u32,

    /// Base backoff between acquire calls (milliseconds), doubled each time.
    #[serde(default = "default_lease_retry_backoff")]
    pub lease_retry_backoff_ms: u64,

    /// Items in a lease-holding phase with no activity for this long are
    /// considered stuck (seconds).
    #[serde(default = "default_stuck_threshold")]
    pub stuck_item_threshold_secs: u64,

    /// Attempts an item may make before a transient failure becomes final.
    #[serde(default = "default_max_item_retries")]
    pub max_item_retries: u32,

    /// Halt the run once more than this many items have failed.
    #[serde(default)]
    pub max_failed_items: Option<u64>,

    /// Emit a progress notification every N settled items.
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,

    /// How often the stuck-item sweep runs (seconds).
    #[serde(default = "default_stuck_sweep_interval")]
    pub stuck_sweep_interval_secs: u64,

    #[serde(default = "default_copy_timeout")]
    pub copy_timeout_secs: u64,

    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,

    #[serde(default = "default_index_timeout")]
    pub index_timeout_secs: u64,
}

fn default_lease_category() -> String {
    "ingestion".to_string()
}

fn default_item_lease_weight() -> u32 {
    1
}

fn default_lease_wait_timeout() -> u64 {
    8 * 60 * 60 // 8 hours
}

fn default_lease_ttl() -> u64 {
    90 * 60 // 90 minutes
}

fn default_lease_acquire_attempts() -> u32 {
    3
}

fn default_lease_retry_backoff() -> u64 {
    500
}

fn default_stuck_threshold() -> u64 {
    30 * 60 // 30 minutes
}

fn default_max_item_retries() -> u32 {
    3
}

fn default_progress_every() -> u64 {
    10
}

fn default_stuck_sweep_interval() -> u64 {
    300
}

fn default_copy_timeout() -> u64 {
    10 * 60
}

fn default_process_timeout() -> u64 {
    30 * 60
}

fn default_index_timeout() -> u64 {
    5 * 60
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lease_category: default_lease_category(),
            item_lease_weight: default_item_lease_weight(),
            lease_wait_timeout_secs: default_lease_wait_timeout(),
            lease_ttl_secs: default_lease_ttl(),
            lease_acquire_attempts: default_lease_acquire_attempts(),
            lease_retry_backoff_ms: default_lease_retry_backoff(),
            stuck_item_threshold_secs: default_stuck_threshold(),
            max_item_retries: default_max_item_retries(),
            max_failed_items: None,
            progress_every: default_progress_every(),
            stuck_sweep_interval_secs: default_stuck_sweep_interval(),
            copy_timeout_secs: default_copy_timeout(),
            process_timeout_secs: default_process_timeout(),
            index_timeout_secs: default_index_timeout(),
        }
    }
}

impl OrchestratorConfig {
    pub fn lease_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_wait_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn lease_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.lease_retry_backoff_ms)
    }

    pub fn stuck_item_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_item_threshold_secs)
    }

    pub fn stuck_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stuck_sweep_interval_secs)
    }

    pub fn copy_timeout(&self) -> Duration {
        Duration::from_secs(self.copy_timeout_secs)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.lease_category, "ingestion");
        assert_eq!(config.item_lease_weight, 1);
        assert_eq!(config.lease_wait_timeout(), Duration::from_secs(8 * 3600));
        assert_eq!(config.lease_ttl(), Duration::from_secs(90 * 60));
        assert_eq!(config.stuck_item_threshold(), Duration::from_secs(30 * 60));
        assert_eq!(config.max_item_retries, 3);
        assert_eq!(config.max_failed_items, None);
        assert_eq!(config.progress_every, 10);
        assert_eq!(config.process_timeout(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            lease_category = "validation"
            item_lease_weight = 2
            lease_wait_timeout_secs = 60
            lease_ttl_secs = 120
            lease_acquire_attempts = 5
            lease_retry_backoff_ms = 100
            stuck_item_threshold_secs = 600
            max_item_retries = 1
            max_failed_items = 10
            progress_every = 50
            stuck_sweep_interval_secs = 30
            copy_timeout_secs = 5
            process_timeout_secs = 6
            index_timeout_secs = 7
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.lease_category, "validation");
        assert_eq!(config.item_lease_weight, 2);
        assert_eq!(config.lease_retry_backoff(), Duration::from_millis(100));
        assert_eq!(config.max_failed_items, Some(10));
        assert_eq!(config.progress_every, 50);
        assert_eq!(config.index_timeout(), Duration::from_secs(7));
    }
}
