//! Utilities shared by both drivers.
//!
//! - [`tls`]: TLS configuration
//! - [`classify_driver_message`]: the one place driver error text is inspected

pub mod tls;

pub use tls::{mariadb_ssl_opts, postgres_tls, SslMode};

use crate::error::ViolationKind;

/// Classify a failed write by the driver's error message.
///
/// MariaDB reports duplicate keys as "Duplicate entry ... for key", PostgreSQL
/// as "duplicate key value violates unique constraint".
pub fn classify_driver_message(message: &str) -> ViolationKind {
    let lower = message.to_lowercase();
    if lower.contains("unique") || lower.contains("duplicate entry") || lower.contains("duplicate key") {
        ViolationKind::Unique
    } else if lower.contains("constraint")
        || lower.contains("foreign key")
        || lower.contains("cannot be null")
        || lower.contains("not-null")
    {
        ViolationKind::Constraint
    } else {
        ViolationKind::Generic
    }
}
