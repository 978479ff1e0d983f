//! Registry of named connectors.
//!
//! The [`ConnectorCatalog`] is explicitly constructed, either from the
//! configuration or by registering connectors by hand, and handed to the
//! session. Nothing is global, so tests register scripted connectors under the
//! same names the configuration would use.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::drivers::build_connector;
use crate::error::{QualityError, Result};

use super::traits::Connector;

/// Connectors keyed by connection name.
#[derive(Default)]
pub struct ConnectorCatalog {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one pooled connector per configured connection.
    ///
    /// Pools open lazily, so this succeeds even if a server is unreachable.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut catalog = Self::new();
        for (name, connection) in &config.connections {
            let connector = build_connector(connection, config.engine.max_connections)?;
            debug!(
                "Registered connection '{}' ({} {}:{}/{})",
                name,
                connection.dialect,
                connection.host,
                connection.port(),
                connection.database
            );
            catalog.register(name.clone(), connector);
        }
        Ok(catalog)
    }

    /// Register a connector, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, connector: Arc<dyn Connector>) {
        self.connectors.insert(name.into(), connector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(name).cloned()
    }

    /// Get a connector by name, returning an error if not found.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Connector>> {
        self.get(name)
            .ok_or_else(|| QualityError::Config(format!("Unknown connection: {}", name)))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Close every pool.
    pub async fn close_all(&self) {
        for connector in self.connectors.values() {
            connector.close().await;
        }
    }
}
