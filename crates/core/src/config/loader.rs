use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides.
///
/// Nested keys are addressed with a double underscore, e.g.
/// `UNMONITARR_GENERAL__DRY_RUN=true` or `UNMONITARR_SERVICES__SONARR__API_KEY=...`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("UNMONITARR_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[general]
release_groups = ["GROUP"]

[services.radarr]
api_key = "abc"
port = 9000
"#;
        let config = load_config_from_str(toml).unwrap();
        let radarr = config.services.radarr.unwrap();
        assert_eq!(radarr.port, Some(9000));
        assert_eq!(config.general.release_groups, vec!["GROUP".to_string()]);
    }

    #[test]
    fn test_load_config_from_str_bad_type() {
        let toml = r#"
[general]
concurrent = "many"
"#;
        let result = load_config_from_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/unmonitarr.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[general]
release_groups = "ALPHA, beta"
dry_run = true

[services.sonarr]
host = "127.0.0.1"
api_key = "key"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert!(config.general.dry_run);
        assert_eq!(config.general.release_groups, vec!["ALPHA", "beta"]);
        let sonarr = config.services.sonarr.unwrap();
        assert_eq!(sonarr.host, "127.0.0.1");
        assert_eq!(sonarr.port_for(crate::config::ServiceKind::Sonarr), 8989);
    }
}
