//! PostgreSQL driver.
//!
//! - [`PostgresConnector`]: deadpool-postgres pool implementing [`Connector`](crate::core::Connector)
//!
//! Statements are prepared (and cached per connection) so bound values can be
//! encoded against the parameter types the server infers.

mod connector;
mod convert;

pub use connector::PostgresConnector;
