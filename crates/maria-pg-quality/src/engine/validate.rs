//! Candidate-value validation.
//!
//! Validation runs in two phases. The first is purely syntactic and needs
//! only the schema: nullability, the bucket's literal format, and text length.
//! The second tries the change on the live table: it looks for the value being
//! replaced and then performs the real `UPDATE` inside a transaction that is
//! always rolled back. Unique, check and foreign-key constraints can only be
//! observed that way.
//!
//! Substring replacement rewrites one matching row with `regexp_replace`.
//! Unification ([`Validator::validate_unification`]) runs the very statement
//! the unify engine will issue, so every row it touches is checked.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::schema::{ColumnInfo, TableSchema, TypeBucket};
use crate::core::traits::{Connector, Statement};
use crate::core::value::SqlValue;
use crate::drivers::classify_driver_message;
use crate::error::{QualityError, Result, ViolationKind};

use super::{
    bind_values, parse_boolean, parse_for_bucket, rollback_quietly, table_ref, value_condition,
    whole_value_update,
};

/// Optional sign, no leading zeros except `0` itself, optional `.0+`.
fn integer_literal() -> &'static Regex {
    static INTEGER_LITERAL: OnceLock<Regex> = OnceLock::new();
    INTEGER_LITERAL.get_or_init(|| {
        Regex::new(r"^[-+]?([1-9]\d*|0)(\.0+)?$").expect("valid integer literal regex")
    })
}

/// Same shape as [`integer_literal`], with any fractional digits.
fn decimal_literal() -> &'static Regex {
    static DECIMAL_LITERAL: OnceLock<Regex> = OnceLock::new();
    DECIMAL_LITERAL.get_or_init(|| {
        Regex::new(r"^[-+]?([1-9]\d*|0)(\.\d+)?$").expect("valid decimal literal regex")
    })
}

/// Outcome of validating one candidate value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    /// The new value is not a literal of the column's bucket, or is NULL for
    /// a NOT NULL column (`value` is `None`).
    TypeMismatch {
        column: String,
        value: Option<String>,
        expected: TypeBucket,
    },
    /// The searched value can never be a whole value of a non-text column.
    SearchValueTypeMismatch {
        column: String,
        value: String,
        expected: TypeBucket,
    },
    LengthExceeded {
        column: String,
        value: String,
        length: usize,
        max_length: u32,
    },
    ValueNotFound {
        column: String,
        value: String,
    },
    UniqueViolation {
        column: String,
        value: String,
        message: String,
    },
    OtherConstraintViolation {
        column: String,
        value: String,
        message: String,
    },
    DatabaseError {
        column: String,
        message: String,
    },
}

impl Verdict {
    /// Stable numeric code, 0 for `Ok`.
    pub fn code(&self) -> u8 {
        match self {
            Verdict::Ok => 0,
            Verdict::TypeMismatch { .. } => 1,
            Verdict::SearchValueTypeMismatch { .. } => 2,
            Verdict::LengthExceeded { .. } => 3,
            Verdict::ValueNotFound { .. } => 4,
            Verdict::UniqueViolation { .. } => 5,
            Verdict::OtherConstraintViolation { .. } => 6,
            Verdict::DatabaseError { .. } => 7,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Ok)
    }

    /// `Ok(())` for [`Verdict::Ok`], a `Validation` error otherwise.
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(QualityError::Validation(self))
        }
    }

    /// Message shown to the operator.
    pub fn message(&self) -> String {
        match self {
            Verdict::Ok => "the value is valid".to_string(),
            Verdict::TypeMismatch {
                column,
                value: None,
                ..
            } => format!("column '{}' does not allow NULL", column),
            Verdict::TypeMismatch {
                column,
                value: Some(value),
                expected,
            } => format!(
                "'{}' is not a valid {} value for column '{}'",
                value, expected, column
            ),
            Verdict::SearchValueTypeMismatch {
                column,
                value,
                expected,
            } => format!(
                "the searched value '{}' cannot occur in {} column '{}'",
                value, expected, column
            ),
            Verdict::LengthExceeded {
                column,
                value,
                length,
                max_length,
            } => format!(
                "'{}' has {} characters but column '{}' allows at most {}",
                value, length, column, max_length
            ),
            Verdict::ValueNotFound { column, value } => {
                format!("the value '{}' does not occur in column '{}'", value, column)
            }
            Verdict::UniqueViolation {
                column,
                value,
                message,
            } => format!(
                "'{}' would violate a uniqueness constraint on column '{}': {}",
                value, column, message
            ),
            Verdict::OtherConstraintViolation {
                column,
                value,
                message,
            } => format!(
                "'{}' would violate a constraint on column '{}': {}",
                value, column, message
            ),
            Verdict::DatabaseError { column, message } => format!(
                "the database rejected the change to column '{}': {}",
                column, message
            ),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message())
    }
}

/// Schema-only checks, in order: nullability, literal format, text length,
/// and whether `old_value` can be a whole value of a non-text column.
pub fn check_syntax(column: &ColumnInfo, new_value: Option<&str>, old_value: &str) -> Verdict {
    let type_mismatch = |value: Option<&str>| Verdict::TypeMismatch {
        column: column.name.clone(),
        value: value.map(str::to_string),
        expected: column.bucket,
    };

    match new_value {
        None if !column.is_nullable => return type_mismatch(None),
        None => {}
        Some(value) => {
            let trimmed = value.trim();
            let well_formed = match column.bucket {
                TypeBucket::Integer => {
                    integer_literal().is_match(trimmed) && parse_for_bucket(column, trimmed).is_some()
                }
                TypeBucket::Decimal => {
                    decimal_literal().is_match(trimmed)
                        && trimmed.parse::<f64>().is_ok_and(f64::is_finite)
                }
                TypeBucket::Boolean => parse_boolean(trimmed).is_some(),
                TypeBucket::Text | TypeBucket::Date => true,
            };
            if !well_formed {
                return type_mismatch(Some(value));
            }

            if let (TypeBucket::Text, Some(max_length)) = (column.bucket, column.max_length) {
                let length = value.chars().count();
                if length > max_length as usize {
                    return Verdict::LengthExceeded {
                        column: column.name.clone(),
                        value: value.to_string(),
                        length,
                        max_length,
                    };
                }
            }
        }
    }

    if column.bucket.is_numeric_family() && parse_for_bucket(column, old_value).is_none() {
        return Verdict::SearchValueTypeMismatch {
            column: column.name.clone(),
            value: old_value.to_string(),
            expected: column.bucket,
        };
    }

    Verdict::Ok
}

/// Validates candidate values for one table.
pub struct Validator<'a> {
    connector: &'a dyn Connector,
    schema: &'a TableSchema,
}

impl<'a> Validator<'a> {
    pub fn new(connector: &'a dyn Connector, schema: &'a TableSchema) -> Self {
        Self { connector, schema }
    }

    /// Validate `new_value` as the replacement for `old_value` in `column`.
    ///
    /// Returns `Err` only for an unknown column or when no connection can be
    /// acquired; every other failure is a [`Verdict`].
    #[instrument(skip(self), fields(table = %self.schema.name))]
    pub async fn validate(
        &self,
        column: &str,
        new_value: Option<&str>,
        old_value: &str,
    ) -> Result<Verdict> {
        let info = self.schema.column(column)?;

        let verdict = check_syntax(info, new_value, old_value);
        if !verdict.is_ok() {
            debug!("Rejected before the trial update: {}", verdict);
            return Ok(verdict);
        }

        self.try_substring_update(info, new_value, old_value).await
    }

    async fn try_substring_update(
        &self,
        column: &ColumnInfo,
        new_value: Option<&str>,
        old_value: &str,
    ) -> Result<Verdict> {
        let dialect = self.schema.dialect;
        let quoted = dialect.quote_ident(&column.name);
        let table = table_ref(self.schema);
        let shown_value = new_value.unwrap_or("NULL").to_string();

        let mut lookup_filter = Vec::with_capacity(2);
        let mut order_by = String::new();
        let mut lookup = Statement::new("");
        if let Some(parsed) = parse_for_bucket(column, old_value) {
            lookup_filter.push(format!("{} = :old_value", quoted));
            order_by = format!(" ORDER BY CASE WHEN {} = :old_value THEN 0 ELSE 1 END", quoted);
            lookup = lookup.bind("old_value", parsed);
        }
        lookup_filter.push(dialect.search_predicate(column, ":needle"));
        lookup.sql = format!(
            "SELECT {} FROM {} WHERE {}{} LIMIT 1",
            quoted,
            table,
            lookup_filter.join(" OR "),
            order_by
        );
        let lookup = lookup.bind("needle", dialect.escape_pattern(old_value));

        let mut conn = self.connector.acquire().await?;
        let found = match conn.execute(&lookup).await {
            Ok(result) => result.first_value().cloned(),
            Err(e) => {
                return Ok(Verdict::DatabaseError {
                    column: column.name.clone(),
                    message: e.driver_message(),
                })
            }
        };
        let condition_value = match found {
            Some(value) if !value.is_null() => value,
            _ => {
                return Ok(Verdict::ValueNotFound {
                    column: column.name.clone(),
                    value: old_value.to_string(),
                })
            }
        };

        let update = (if column.bucket.is_text() {
            Statement::new(format!(
                "UPDATE {} SET {} = {} WHERE {} = :condition_value",
                table,
                quoted,
                dialect.regexp_replace(&quoted, ":pattern", ":replacement"),
                quoted
            ))
            .bind("pattern", dialect.literal_regex(old_value))
            .bind(
                "replacement",
                new_value.map(|v| dialect.literal_replacement(v)),
            )
        } else {
            let new = new_value.and_then(|v| parse_for_bucket(column, v));
            Statement::new(format!(
                "UPDATE {} SET {} = :new_value WHERE {} = :condition_value",
                table, quoted, quoted
            ))
            .bind("new_value", new.unwrap_or(SqlValue::Null))
        })
        .bind("condition_value", condition_value);

        conn.begin().await?;
        let outcome = conn.execute(&update).await;
        rollback_quietly(conn.as_mut()).await;

        Ok(match outcome {
            Ok(_) => Verdict::Ok,
            Err(e) => classify_failure(column, shown_value, e.driver_message()),
        })
    }

    /// Validate merging the whole values `old_values` of `column` into `new`.
    ///
    /// The rolled-back write is the unify statement itself
    /// (`SET col = :new WHERE col = :v0 OR ...`), so a unique constraint hit
    /// by any of the merged rows is reported here.
    #[instrument(skip(self, old_values), fields(table = %self.schema.name))]
    pub async fn validate_unification(
        &self,
        column: &str,
        new_value: &str,
        old_values: &[String],
    ) -> Result<Verdict> {
        let info = self.schema.column(column)?;

        for old_value in old_values {
            let verdict = check_syntax(info, Some(new_value), old_value);
            if !verdict.is_ok() {
                debug!("Rejected before the trial update: {}", verdict);
                return Ok(verdict);
            }
        }

        let quoted = self.schema.dialect.quote_ident(&info.name);
        let lookup = bind_values(
            Statement::new(format!(
                "SELECT {} FROM {} WHERE {} LIMIT 1",
                quoted,
                table_ref(self.schema),
                value_condition(self.schema.dialect, info, old_values.len())
            )),
            info,
            old_values,
        );

        let mut conn = self.connector.acquire().await?;
        match conn.execute(&lookup).await {
            Ok(result) if result.rows.is_empty() => {
                return Ok(Verdict::ValueNotFound {
                    column: info.name.clone(),
                    value: old_values.join(", "),
                })
            }
            Ok(_) => {}
            Err(e) => {
                return Ok(Verdict::DatabaseError {
                    column: info.name.clone(),
                    message: e.driver_message(),
                })
            }
        }

        let update = whole_value_update(self.schema, info, old_values, new_value);
        conn.begin().await?;
        let outcome = conn.execute(&update).await;
        rollback_quietly(conn.as_mut()).await;

        Ok(match outcome {
            Ok(_) => Verdict::Ok,
            Err(e) => classify_failure(info, new_value.to_string(), e.driver_message()),
        })
    }
}

/// Map a rejected trial update to its verdict.
fn classify_failure(column: &ColumnInfo, shown_value: String, message: String) -> Verdict {
    match classify_driver_message(&message) {
        ViolationKind::Unique => Verdict::UniqueViolation {
            column: column.name.clone(),
            value: shown_value,
            message,
        },
        ViolationKind::Constraint => Verdict::OtherConstraintViolation {
            column: column.name.clone(),
            value: shown_value,
            message,
        },
        ViolationKind::Generic => Verdict::DatabaseError {
            column: column.name.clone(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{int, make_test_column, make_test_schema, text, Event, FakeConnector};
    use crate::dialect::Dialect;

    fn integer_column() -> ColumnInfo {
        make_test_column("Semester", "int(11)", TypeBucket::Integer)
    }

    // ========================================================================
    // Syntax phase
    // ========================================================================

    #[test]
    fn test_integer_literals() {
        let col = integer_column();
        for ok in ["0", "42", "-7", "+3", "5.0", "12.000"] {
            assert_eq!(check_syntax(&col, Some(ok), "1"), Verdict::Ok, "{}", ok);
        }
        for bad in ["007", "4.5", "1e3", "abc", "", "99999999999999999999"] {
            assert_eq!(check_syntax(&col, Some(bad), "1").code(), 1, "{}", bad);
        }
    }

    #[test]
    fn test_decimal_literals() {
        let col = make_test_column("Note", "decimal(3,1)", TypeBucket::Decimal);
        assert!(check_syntax(&col, Some("2.3"), "1").is_ok());
        assert!(check_syntax(&col, Some("-0.5"), "1").is_ok());
        assert_eq!(check_syntax(&col, Some("01.5"), "1").code(), 1);
        assert_eq!(check_syntax(&col, Some("zwei"), "1").code(), 1);
    }

    #[test]
    fn test_boolean_tokens() {
        let col = make_test_column("aktiv", "tinyint(1)", TypeBucket::Boolean);
        for ok in ["true", "FALSE", "1", "0"] {
            assert!(check_syntax(&col, Some(ok), "1").is_ok(), "{}", ok);
        }
        assert_eq!(check_syntax(&col, Some("2"), "1").code(), 1);
    }

    #[test]
    fn test_null_for_not_null_column() {
        let mut col = integer_column();
        col.is_nullable = false;
        let verdict = check_syntax(&col, None, "1");
        assert_eq!(verdict.code(), 1);
        assert!(verdict.message().contains("does not allow NULL"));

        col.is_nullable = true;
        assert!(check_syntax(&col, None, "1").is_ok());
    }

    #[test]
    fn test_length_exceeded_iff_strictly_longer() {
        let mut col = make_test_column("Vorname", "varchar(5)", TypeBucket::Text);
        col.max_length = Some(5);
        assert!(check_syntax(&col, Some("Jojoa"), "Jo").is_ok());
        assert!(check_syntax(&col, Some("Jürgé"), "Jo").is_ok());
        match check_syntax(&col, Some("Jojoan"), "Jo") {
            Verdict::LengthExceeded {
                length, max_length, ..
            } => {
                assert_eq!(length, 6);
                assert_eq!(max_length, 5);
            }
            other => panic!("expected LengthExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_search_value_must_fit_non_text_column() {
        let verdict = check_syntax(&integer_column(), Some("5"), "drei");
        assert_eq!(verdict.code(), 2);
    }

    #[test]
    fn test_verdict_display_and_error() {
        let verdict = Verdict::ValueNotFound {
            column: "Vorname".into(),
            value: "Xaver".into(),
        };
        assert_eq!(
            verdict.to_string(),
            "[4] the value 'Xaver' does not occur in column 'Vorname'"
        );
        let err = verdict.into_result().unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(Verdict::Ok.into_result().is_ok());
    }

    // ========================================================================
    // Trial update
    // ========================================================================

    #[tokio::test]
    async fn test_unknown_column_is_error() {
        let fake = FakeConnector::new(Dialect::Postgres);
        let schema = make_test_schema(Dialect::Postgres);
        let err = Validator::new(&fake, &schema)
            .validate("Geburtstag", Some("x"), "y")
            .await
            .unwrap_err();
        assert!(matches!(err, QualityError::UnsupportedColumn { .. }));
    }

    #[tokio::test]
    async fn test_value_not_found() {
        let fake = FakeConnector::new(Dialect::Postgres);
        let schema = make_test_schema(Dialect::Postgres);
        fake.push_rows(&["Vorname"], vec![]);

        let verdict = Validator::new(&fake, &schema)
            .validate("Vorname", Some("Jojo"), "Xaver")
            .await
            .unwrap();
        assert_eq!(verdict.code(), 4);
        assert_eq!(fake.count(&Event::Begin), 0);

        let lookup = &fake.statements()[0];
        assert_eq!(
            lookup.sql,
            "SELECT \"Vorname\" FROM \"studenten\" WHERE \"Vorname\" = :old_value OR \"Vorname\" ILIKE '%' || :needle || '%' \
             ORDER BY CASE WHEN \"Vorname\" = :old_value THEN 0 ELSE 1 END LIMIT 1"
        );
    }

    #[tokio::test]
    async fn test_trial_update_is_always_rolled_back() {
        let fake = FakeConnector::new(Dialect::Postgres);
        let schema = make_test_schema(Dialect::Postgres);
        fake.push_rows(&["Vorname"], vec![vec![text("Joanna")]]);
        fake.push_affected(1);

        let verdict = Validator::new(&fake, &schema)
            .validate("Vorname", Some("Jojo"), "Jo")
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Ok);
        assert_eq!(fake.count(&Event::Rollback), 1);
        assert_eq!(fake.count(&Event::Commit), 0);

        let update = &fake.statements()[1];
        assert!(update.sql.starts_with("UPDATE \"studenten\" SET \"Vorname\" = regexp_replace("));
        assert_eq!(update.param("condition_value"), Some(&text("Joanna")));
        assert_eq!(update.param("pattern"), Some(&text("Jo")));
    }

    #[tokio::test]
    async fn test_trial_update_classifies_unique_violation() {
        let fake = FakeConnector::new(Dialect::MariaDb);
        let schema = make_test_schema(Dialect::MariaDb);
        fake.push_rows(&["Matrikelnummer"], vec![vec![int(3)]]);
        fake.push_error("Duplicate entry '4' for key 'PRIMARY'");

        let verdict = Validator::new(&fake, &schema)
            .validate("Matrikelnummer", Some("4"), "3")
            .await
            .unwrap();
        assert_eq!(verdict.code(), 5);
        assert_eq!(fake.count(&Event::Rollback), 1);

        let update = &fake.statements()[1];
        assert_eq!(
            update.sql,
            "UPDATE \"studenten\" SET \"Matrikelnummer\" = :new_value WHERE \"Matrikelnummer\" = :condition_value"
        );
        assert_eq!(update.param("new_value"), Some(&int(4)));
    }

    #[tokio::test]
    async fn test_trial_update_classifies_other_failures() {
        let fake = FakeConnector::new(Dialect::Postgres);
        let schema = make_test_schema(Dialect::Postgres);
        fake.push_rows(&["Vorname"], vec![vec![text("Joel")]]);
        fake.push_error("new row violates check constraint \"name_not_blank\"");
        let verdict = Validator::new(&fake, &schema)
            .validate("Vorname", Some(""), "Joel")
            .await
            .unwrap();
        assert_eq!(verdict.code(), 6);

        fake.push_rows(&["Vorname"], vec![vec![text("Joel")]]);
        fake.push_error("canceling statement due to lock timeout");
        let verdict = Validator::new(&fake, &schema)
            .validate("Vorname", Some("Jo"), "Joel")
            .await
            .unwrap();
        assert_eq!(verdict.code(), 7);
        assert!(verdict.message().contains("lock timeout"));
    }
}
