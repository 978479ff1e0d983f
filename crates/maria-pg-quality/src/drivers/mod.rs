//! Database driver implementations.
//!
//! Each driver provides a [`Connector`] for one dialect:
//!
//! - [`mysql`]: MariaDB via `mysql_async`
//! - [`postgres`]: PostgreSQL via `tokio-postgres` and `deadpool-postgres`
//! - [`common`]: shared utilities (TLS, driver error classification)
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement [`Connector`] and [`Connection`](crate::core::Connection)
//! 3. Add a [`Dialect`] variant and its syntax rules
//! 4. Add a branch to [`build_connector`]

pub mod common;
pub mod mysql;
pub mod postgres;

pub use common::{classify_driver_message, SslMode};
pub use mysql::MysqlConnector;
pub use postgres::PostgresConnector;

use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::core::traits::Connector;
use crate::dialect::Dialect;
use crate::error::Result;

/// Create the connector matching the configured dialect.
pub fn build_connector(config: &ConnectionConfig, max_conns: usize) -> Result<Arc<dyn Connector>> {
    let connector: Arc<dyn Connector> = match config.dialect()? {
        Dialect::MariaDb => Arc::new(MysqlConnector::new(config, max_conns)?),
        Dialect::Postgres => Arc::new(PostgresConnector::new(config, max_conns)?),
    };
    Ok(connector)
}
