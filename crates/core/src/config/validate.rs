use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
///
/// Checks the cross-field rules serde can't express:
/// - server port is not 0
/// - at least one coordinator category, none with zero capacity
/// - the orchestrator's lease category exists and can fit one item lease
/// - every scheduled job is valid and no two share an orchestration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.coordinator.categories.is_empty() {
        return Err(ConfigError::ValidationError(
            "coordinator.categories must define at least one category".to_string(),
        ));
    }

    if let Some((name, _)) = config
        .coordinator
        .categories
        .iter()
        .find(|(_, capacity)| **capacity == 0)
    {
        return Err(ConfigError::ValidationError(format!(
            "coordinator.categories.{} cannot have capacity 0",
            name
        )));
    }

    let category = &config.orchestrator.lease_category;
    let Some(capacity) = config.coordinator.categories.get(category) else {
        return Err(ConfigError::ValidationError(format!(
            "orchestrator.lease_category '{}' is not a configured coordinator category",
            category
        )));
    };

    if config.orchestrator.item_lease_weight > *capacity {
        return Err(ConfigError::ValidationError(format!(
            "orchestrator.item_lease_weight {} exceeds capacity {} of category '{}'",
            config.orchestrator.item_lease_weight, capacity, category
        )));
    }

    if config.orchestrator.progress_every == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.progress_every cannot be 0".to_string(),
        ));
    }

    let mut scheduled = HashSet::new();
    for (i, job) in config.schedule.jobs.iter().enumerate() {
        job.validate().map_err(|e| {
            ConfigError::ValidationError(format!("schedule.jobs[{}]: {}", i, e))
        })?;
        if !scheduled.insert(job.key()) {
            return Err(ConfigError::ValidationError(format!(
                "schedule.jobs[{}] duplicates {}/{}",
                i, job.category, job.qualifier
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    #[test]
    fn test_validate_default_config() {
        let config = load_config_from_str("").unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = load_config_from_str("[server]\nport = 0\n").unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_capacity_fails() {
        let config = load_config_from_str(
            r#"
[coordinator.categories]
ingestion = 0
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("capacity 0"));
    }

    #[test]
    fn test_validate_unknown_lease_category_fails() {
        let config = load_config_from_str(
            r#"
[orchestrator]
lease_category = "generation"
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("generation"));
    }

    #[test]
    fn test_validate_weight_above_capacity_fails() {
        let config = load_config_from_str(
            r#"
[coordinator.categories]
ingestion = 2

[orchestrator]
item_lease_weight = 3
"#,
        )
        .unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_schedule() {
        let config = load_config_from_str(
            r#"
[[schedule.jobs]]
category = "blobs"
qualifier = "nightly"
interval_secs = 3600
"#,
        )
        .unwrap();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.schedule.jobs.len(), 1);
    }

    #[test]
    fn test_validate_schedule_zero_interval_fails() {
        let config = load_config_from_str(
            r#"
[[schedule.jobs]]
category = "blobs"
qualifier = "nightly"
interval_secs = 0
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("schedule.jobs[0]"));
    }

    #[test]
    fn test_validate_schedule_duplicate_job_fails() {
        let config = load_config_from_str(
            r#"
[[schedule.jobs]]
category = "blobs"
qualifier = "nightly"
interval_secs = 60

[[schedule.jobs]]
category = "blobs"
qualifier = "nightly"
mode = "reindex"
interval_secs = 86400
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicates"));
    }
}
