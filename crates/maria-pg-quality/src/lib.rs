//! # maria-pg-quality
//!
//! Data-quality operations on MariaDB and PostgreSQL tables.
//!
//! This library provides:
//!
//! - **Type classification** of native column types into canonical buckets
//! - **Validation** of candidate values, with a rolled-back trial update
//! - **Search** for a substring across any set of columns
//! - **Replacement** with dry runs, per-cell plans and selective commits
//! - **Unification** of several distinct values into one
//! - **Joins** across tables on the same or on different servers
//! - **Compatibility matrices** for choosing join columns
//!
//! ## Example
//!
//! ```rust,no_run
//! use maria_pg_quality::{Config, ConnectorCatalog, ColumnSelection, Session, Slot};
//!
//! #[tokio::main]
//! async fn main() -> maria_pg_quality::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let catalog = ConnectorCatalog::from_config(&config)?;
//!
//!     let mut session = Session::new();
//!     let students = session
//!         .select_table(Slot::First, catalog.require("uni")?, "studenten")
//!         .await?;
//!     let plan = students
//!         .replace()
//!         .replace_all(&ColumnSelection::one("Vorname"), "Jo", "Jojo", false)
//!         .await?;
//!     println!("{} rows would change", plan.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod session;

// Re-exports for convenient access
pub use crate::core::{
    ColumnInfo, ColumnSelection, Connection, ConnectionTarget, Connector, ConnectorCatalog,
    QueryResult, ResultSet, SqlValue, Statement, TableSchema, TypeBucket,
};
pub use config::{Config, ConnectionConfig, EngineConfig};
pub use dialect::Dialect;
pub use engine::{
    build_matrix, CastDirection, CompatibilityCode, CompatibilityMatrix, JoinEngine, JoinRequest,
    JoinResult, MetadataLoader, ReplaceEngine, SearchEngine, UnifyEngine, Validator, Verdict,
};
pub use error::{QualityError, Result, ViolationKind};
pub use session::{Session, Slot, TableContext};
