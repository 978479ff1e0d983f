//! Core abstractions shared by every engine.
//!
//! - [`schema`]: table and column metadata
//! - [`value`]: owned SQL values and result sets
//! - [`traits`]: connector, connection and statement types
//! - [`identifier`]: identifier validation and quoting
//! - [`catalog`]: named connectors built from configuration
//!
//! Engines depend only on these types; the concrete drivers live in
//! `drivers/` and are reached through [`Connector`].

pub mod catalog;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::ConnectorCatalog;
pub use schema::{ColumnInfo, ColumnSelection, TableSchema, TypeBucket};
pub use traits::{Connection, ConnectionTarget, Connector, QueryResult, Statement};
pub use value::{ResultSet, SqlValue};
