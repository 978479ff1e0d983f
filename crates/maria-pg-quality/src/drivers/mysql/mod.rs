//! MariaDB driver.
//!
//! - [`MysqlConnector`]: `mysql_async` pool implementing [`Connector`](crate::core::Connector)
//!
//! # Supported Versions
//!
//! - MariaDB 10.5+ (MySQL 8.0 works for everything except `REGEXP_REPLACE`
//!   case-sensitivity flags)
//!
//! Statements use the binary protocol with positional `?` parameters.

mod connector;
mod convert;

pub use connector::MysqlConnector;
