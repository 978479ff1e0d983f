//! Identifier validation and quoting.
//!
//! SQL identifiers (table and column names) cannot be bound as parameters, so
//! every statement the engines build splices them into the SQL text. Names are
//! only ever taken from a previously loaded [`TableSchema`](super::TableSchema),
//! and are validated when that schema is built.
//!
//! Quoting follows the convention both dialects share once MariaDB runs with
//! `sql_mode='ANSI_QUOTES'`: every name is wrapped in double quotes and any
//! embedded double quote is doubled. Reserved words (`user`, `order`) and
//! mixed-case PostgreSQL names therefore reach the server verbatim.

use crate::error::{QualityError, Result};

/// Longest accepted name in bytes; both servers stop well below this.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Reject names that cannot be spliced into SQL text: empty, containing NUL,
/// or longer than [`MAX_IDENTIFIER_LENGTH`] bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    let problem = if name.is_empty() {
        "is empty".to_string()
    } else if name.contains('\0') {
        "contains a null byte".to_string()
    } else if name.len() > MAX_IDENTIFIER_LENGTH {
        format!("is {} bytes long, limit {}", name.len(), MAX_IDENTIFIER_LENGTH)
    } else {
        return Ok(());
    };
    Err(QualityError::QueryBuild(format!(
        "Identifier {:?} {}",
        name, problem
    )))
}

/// Quote an identifier for either dialect.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(quote_ident("Vorname"), "\"Vorname\"");
/// assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
/// ```
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualify a table with its database (MariaDB only has one namespace level
/// that can be crossed inside a single connection).
pub fn qualify(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("Matrikelnummer").is_ok());
        assert!(validate_identifier("first name").is_ok());
    }

    #[test]
    fn test_validate_identifier_empty() {
        let result = validate_identifier("");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_validate_identifier_null_byte() {
        let result = validate_identifier("users\0--");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("null byte"));
        assert!(validate_identifier("users\0").is_err());
    }

    #[test]
    fn test_validate_identifier_max_length() {
        let at_limit = "a".repeat(MAX_IDENTIFIER_LENGTH);
        assert!(validate_identifier(&at_limit).is_ok());
        let too_long = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        assert!(validate_identifier(&too_long).is_err());
    }

    // =========================================================================
    // Quoting tests
    // =========================================================================

    #[test]
    fn test_plain_names_are_quoted() {
        assert_eq!(quote_ident("students"), "\"students\"");
        assert_eq!(quote_ident("Vorname"), "\"Vorname\"");
        assert_eq!(quote_ident("last name"), "\"last name\"");
        assert_eq!(quote_ident("2024_sales"), "\"2024_sales\"");
    }

    #[test]
    fn test_reserved_words_are_quoted() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("order"), "\"order\"");
    }

    #[test]
    fn test_embedded_quote_doubled() {
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_prequoted_name_is_escaped() {
        assert_eq!(quote_ident("\"Vorname\""), "\"\"\"Vorname\"\"\"");
        assert_eq!(
            quote_ident("x\" FROM secrets --"),
            "\"x\"\" FROM secrets --\""
        );
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("uni", "students"), "\"uni\".\"students\"");
        assert_eq!(qualify("uni", "Student List"), "\"uni\".\"Student List\"");
    }
}
