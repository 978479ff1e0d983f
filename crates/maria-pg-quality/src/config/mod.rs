//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{QualityError, Result};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Look up a named connection.
    pub fn connection(&self, name: &str) -> Result<&ConnectionConfig> {
        self.connections.get(name).ok_or_else(|| {
            QualityError::Config(format!(
                "Unknown connection '{}' (configured: {})",
                name,
                self.connections
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
connections:
  hr:
    dialect: mariadb
    host: db1
    database: personal
    user: quality
    password: secret
  warehouse:
    dialect: postgres
    host: db2
    port: 5433
    database: dwh
    user: quality
    ssl_mode: require
engine:
  preview_rows: 5
"#;

    #[test]
    fn test_from_yaml() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.connections.len(), 2);
        assert_eq!(config.connection("warehouse").unwrap().port(), 5433);
        assert_eq!(config.engine.preview_rows, 5);
        assert_eq!(config.engine.max_connections, 4);
    }

    #[test]
    fn test_unknown_connection() {
        let config = Config::from_yaml(YAML).unwrap();
        let err = config.connection("crm").unwrap_err();
        assert!(err.to_string().contains("hr, warehouse"));
    }

    #[test]
    fn test_password_not_serialized() {
        let config = Config::from_yaml(YAML).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("secret"));
    }

    #[test]
    fn test_invalid_yaml_is_yaml_error() {
        let err = Config::from_yaml("connections: [").unwrap_err();
        assert!(matches!(err, QualityError::Yaml(_)));
    }
}
