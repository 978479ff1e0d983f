//! Configuration validation.

use super::Config;
use crate::drivers::common::SslMode;
use crate::error::{QualityError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.connections.is_empty() {
        return Err(QualityError::Config(
            "connections must define at least one database".into(),
        ));
    }

    for (name, conn) in &config.connections {
        if name.trim().is_empty() {
            return Err(QualityError::Config(
                "connection names cannot be empty".into(),
            ));
        }
        if conn.host.is_empty() {
            return Err(QualityError::Config(format!(
                "connections.{}.host is required",
                name
            )));
        }
        if conn.database.is_empty() {
            return Err(QualityError::Config(format!(
                "connections.{}.database is required",
                name
            )));
        }
        if conn.user.is_empty() {
            return Err(QualityError::Config(format!(
                "connections.{}.user is required",
                name
            )));
        }
        if let Err(e) = conn.dialect() {
            return Err(QualityError::Config(format!(
                "connections.{}.dialect: {}",
                name, e
            )));
        }
        if let Some(0) = conn.port {
            return Err(QualityError::Config(format!(
                "connections.{}.port must be non-zero",
                name
            )));
        }
        SslMode::parse(&conn.ssl_mode)?;
    }

    if config.engine.preview_rows == 0 {
        return Err(QualityError::Config(
            "engine.preview_rows must be at least 1".into(),
        ));
    }
    if config.engine.max_connections == 0 {
        return Err(QualityError::Config(
            "engine.max_connections must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, EngineConfig};
    use std::collections::BTreeMap;

    fn connection(dialect: &str) -> ConnectionConfig {
        ConnectionConfig {
            dialect: dialect.to_string(),
            host: "localhost".to_string(),
            port: None,
            database: "uni".to_string(),
            user: "quality".to_string(),
            password: "password".to_string(),
            ssl_mode: "disable".to_string(),
        }
    }

    fn valid_config() -> Config {
        let mut connections = BTreeMap::new();
        connections.insert("hr".to_string(), connection("mariadb"));
        connections.insert("warehouse".to_string(), connection("postgres"));
        Config {
            connections,
            engine: EngineConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_no_connections() {
        let mut config = valid_config();
        config.connections.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_host() {
        let mut config = valid_config();
        config.connections.get_mut("hr").unwrap().host = "".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("connections.hr.host is required"));
    }

    #[test]
    fn test_unknown_dialect() {
        let mut config = valid_config();
        config.connections.get_mut("hr").unwrap().dialect = "oracle".to_string();
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, QualityError::Config(_)));
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = valid_config();
        config.connections.get_mut("warehouse").unwrap().ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_preview_rows() {
        let mut config = valid_config();
        config.engine.preview_rows = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_default_ports_follow_dialect() {
        let config = valid_config();
        assert_eq!(config.connections["hr"].port(), 3306);
        assert_eq!(config.connections["warehouse"].port(), 5432);
    }

    #[test]
    fn test_connection_debug_redacts_password() {
        let mut conn = connection("postgres");
        conn.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", conn);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
