//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::Result;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Named database connections.
    pub connections: BTreeMap<String, ConnectionConfig>,

    /// Engine behavior configuration.
    #[serde(default)]
    pub engine: EngineConfig,
}

/// One database connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Dialect name: "mariadb" or "postgres".
    pub dialect: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 3306 for MariaDB, 5432 for PostgreSQL).
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl ConnectionConfig {
    /// Parsed dialect.
    pub fn dialect(&self) -> Result<Dialect> {
        Dialect::from_name(&self.dialect)
    }

    /// Configured port, or the dialect's default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| {
            self.dialect()
                .map(|d| d.default_port())
                .unwrap_or(Dialect::Postgres.default_port())
        })
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Engine behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows shown per table in the table overview (default: 20).
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,

    /// Pool size per connection (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preview_rows: default_preview_rows(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_preview_rows() -> usize {
    20
}

fn default_max_connections() -> usize {
    4
}
