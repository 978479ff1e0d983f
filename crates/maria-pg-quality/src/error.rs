//! Error types for the data-quality engine.

use thiserror::Error;

use crate::engine::validate::Verdict;

/// How a failed write was classified from the driver's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// A unique or primary-key constraint rejected the write.
    Unique,
    /// Any other constraint (check, foreign key, not null) rejected the write.
    Constraint,
    /// The failure was not a constraint violation.
    Generic,
}

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum QualityError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dialect name is not one of the supported dialects
    #[error("Unsupported dialect '{0}' (expected mariadb or postgres)")]
    UnsupportedDialect(String),

    /// A column name was not found in the table schema
    #[error("Column '{column}' does not exist in table '{table}'")]
    UnsupportedColumn { table: String, column: String },

    /// A native column type has no known bucket
    #[error("Unsupported {dialect} column type '{type_name}'")]
    UnsupportedType { dialect: String, type_name: String },

    /// Candidate value was rejected before or during the trial update
    #[error("Validation failed: {0}")]
    Validation(Verdict),

    /// A committing statement failed and was rolled back
    #[error("Update failed: {message}")]
    Mutation { kind: ViolationKind, message: String },

    /// Caller passed a malformed combination of arguments
    #[error("Query build error: {0}")]
    QueryBuild(String),

    /// Database statement failed
    #[error("Database error: {message}\n  Context: {context}")]
    Database { message: String, context: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QualityError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        QualityError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Database error with context about where it occurred
    pub fn database(message: impl Into<String>, context: impl Into<String>) -> Self {
        QualityError::Database {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Mutation error
    pub fn mutation(kind: ViolationKind, message: impl Into<String>) -> Self {
        QualityError::Mutation {
            kind,
            message: message.into(),
        }
    }

    /// Underlying driver message for database failures, or the display text otherwise.
    pub fn driver_message(&self) -> String {
        match self {
            QualityError::Database { message, .. } | QualityError::Pool { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            QualityError::Config(_) | QualityError::Yaml(_) => 1,
            QualityError::Database { .. } | QualityError::Pool { .. } => 2,
            QualityError::QueryBuild(_) => 3,
            QualityError::Validation(_) => 4,
            QualityError::Mutation { .. } => 5,
            QualityError::UnsupportedDialect(_)
            | QualityError::UnsupportedColumn { .. }
            | QualityError::UnsupportedType { .. } => 6,
            QualityError::Io(_) => 7,
            QualityError::Json(_) => 8,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, QualityError>;
