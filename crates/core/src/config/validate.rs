use tracing::warn;

use super::{types::Config, ConfigError, ServiceKind};

/// Validate configuration
/// Currently validates:
/// - At least one service is enabled
/// - Enabled services have a host, a non-zero port and an API key
/// - Worker count and retry attempts are at least 1
///
/// An empty release group list is allowed but logged, since nothing will match.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut enabled = Vec::new();

    for kind in [ServiceKind::Radarr, ServiceKind::Sonarr] {
        let Some(service) = config.services.enabled(kind) else {
            continue;
        };

        if service.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "services.{}.host cannot be empty",
                kind
            )));
        }
        if service.port == Some(0) {
            return Err(ConfigError::ValidationError(format!(
                "services.{}.port cannot be 0",
                kind
            )));
        }
        if service.api_key.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "services.{}.api_key is required",
                kind
            )));
        }
        enabled.push(kind);
    }

    if enabled.is_empty() {
        return Err(ConfigError::ValidationError(
            "no services (radarr or sonarr) enabled".to_string(),
        ));
    }

    if config.general.concurrent == 0 {
        return Err(ConfigError::ValidationError(
            "general.concurrent must be at least 1".to_string(),
        ));
    }

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.general.release_groups.is_empty() {
        warn!("No release groups configured, nothing will be unmonitored");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.general.release_groups = vec!["GRP".to_string()];
        config.services.sonarr = Some(ServiceConfig::new("localhost", "key"));
        config
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_no_services_fails() {
        let mut config = valid_config();
        config.services.sonarr = None;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_disabled_service_counts_as_missing() {
        let mut config = valid_config();
        if let Some(sonarr) = config.services.sonarr.as_mut() {
            sonarr.enabled = false;
        }
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_missing_api_key_fails() {
        let mut config = valid_config();
        config.services.radarr = Some(ServiceConfig::new("localhost", ""));
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("services.radarr.api_key"));
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = valid_config();
        if let Some(sonarr) = config.services.sonarr.as_mut() {
            sonarr.port = Some(0);
        }
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let mut config = valid_config();
        config.general.concurrent = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_release_groups_is_allowed() {
        let mut config = valid_config();
        config.general.release_groups.clear();
        tokio_test::assert_ok!(validate_config(&config));
    }
}
