//! Search, mutation and reconciliation engines.
//!
//! Every engine borrows a [`Connector`](crate::core::Connector) and a
//! [`TableSchema`] for the duration of one call. A call acquires a single
//! connection, runs its statements and drops the connection before returning.
//!
//! - [`metadata`]: schema loading, table overview, full reads
//! - [`validate`]: syntactic checks and the rolled-back trial update
//! - [`search`]: pattern search across columns
//! - [`replace`]: bulk and per-occurrence replacement with dry runs
//! - [`unify`]: merging distinct values into one
//! - [`join`]: same-server and federated joins
//! - [`compat`]: column-pair compatibility matrix

pub mod compat;
pub mod join;
pub mod metadata;
pub mod replace;
pub mod search;
pub mod unify;
pub mod validate;

pub use compat::{build_matrix, CompatibilityCode, CompatibilityMatrix};
pub use join::{
    CastDirection, JoinEngine, JoinRequest, JoinResult, JoinSide, JoinStrategy, UnmatchedCount,
};
pub use metadata::{build_condition, MetadataLoader, TableOverview, TablePreview};
pub use replace::{
    select_occurrences, Occurrence, PlanEntry, ReplaceEngine, ReplaceSummary, ReplacementPlan,
};
pub use search::SearchEngine;
pub use unify::{DistinctValue, UnifyEngine};
pub use validate::{Validator, Verdict};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::core::schema::{ColumnInfo, TableSchema, TypeBucket};
use crate::core::traits::{Connection, Statement};
use crate::core::value::SqlValue;
use crate::dialect::Dialect;
use crate::drivers::classify_driver_message;
use crate::error::{QualityError, Result};

/// The table name as it appears in a `FROM` clause.
pub(crate) fn table_ref(schema: &TableSchema) -> String {
    schema.dialect.quote_ident(&schema.name)
}

/// Comma-separated, quoted primary-key columns, optionally prefixed with an
/// alias.
pub(crate) fn primary_key_list(schema: &TableSchema, alias: Option<&str>) -> String {
    schema
        .primary_key()
        .iter()
        .map(|pk| {
            let quoted = schema.dialect.quote_ident(pk);
            match alias {
                Some(alias) => format!("{}.{}", alias, quoted),
                None => quoted,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Quoted names of all columns in table order.
pub(crate) fn column_list(schema: &TableSchema) -> String {
    schema
        .columns()
        .iter()
        .map(|c| schema.dialect.quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `col = :v0 OR col = :v1 ...`
pub(crate) fn value_condition(dialect: Dialect, column: &ColumnInfo, count: usize) -> String {
    let quoted = dialect.quote_ident(&column.name);
    (0..count)
        .map(|i| format!("{} = :v{}", quoted, i))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Bind `values`, coerced to the column's bucket, as `v0`, `v1`, ...
pub(crate) fn bind_values(
    statement: Statement,
    column: &ColumnInfo,
    values: &[String],
) -> Statement {
    values.iter().enumerate().fold(statement, |s, (i, v)| {
        s.bind(format!("v{}", i), coerce_for_bucket(column, v))
    })
}

/// `UPDATE t SET col = :new WHERE col = :v0 OR ...`, the write behind a
/// unification.
pub(crate) fn whole_value_update(
    schema: &TableSchema,
    column: &ColumnInfo,
    old_values: &[String],
    new: &str,
) -> Statement {
    let sql = format!(
        "UPDATE {} SET {} = :new WHERE {}",
        table_ref(schema),
        schema.dialect.quote_ident(&column.name),
        value_condition(schema.dialect, column, old_values.len())
    );
    bind_values(Statement::new(sql), column, old_values).bind("new", coerce_for_bucket(column, new))
}

/// Parse a user-supplied value into the column's bucket.
///
/// Returns `None` when the value cannot be a whole value of that column.
/// Text and date columns accept any input; the server decides for dates.
pub(crate) fn parse_for_bucket(column: &ColumnInfo, raw: &str) -> Option<SqlValue> {
    let trimmed = raw.trim();
    match column.bucket {
        TypeBucket::Text | TypeBucket::Date => Some(SqlValue::Text(raw.to_string())),
        TypeBucket::Integer => trimmed
            .parse::<i64>()
            .ok()
            .or_else(|| {
                trimmed
                    .parse::<Decimal>()
                    .ok()
                    .filter(|d| d.fract().is_zero())
                    .and_then(|d| d.to_i64())
            })
            .map(SqlValue::Int),
        TypeBucket::Decimal => trimmed
            .parse::<Decimal>()
            .ok()
            .map(SqlValue::Decimal)
            .or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(SqlValue::Float)
            }),
        TypeBucket::Boolean => parse_boolean(trimmed).map(SqlValue::Bool),
    }
}

/// Parse into the column's bucket, falling back to text.
pub(crate) fn coerce_for_bucket(column: &ColumnInfo, raw: &str) -> SqlValue {
    parse_for_bucket(column, raw).unwrap_or_else(|| SqlValue::Text(raw.to_string()))
}

/// The two canonical boolean tokens and their 0/1 equivalents.
pub(crate) fn parse_boolean(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Row count or ordinal returned by the server.
pub(crate) fn as_count(value: &SqlValue) -> u64 {
    match value {
        SqlValue::Int(i) => u64::try_from(*i).unwrap_or(0),
        SqlValue::Decimal(d) => d.to_u64().unwrap_or(0),
        SqlValue::Float(f) if *f >= 0.0 => *f as u64,
        SqlValue::Text(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Text rendering of a metadata value, decoding raw bytes leniently.
pub(crate) fn as_string(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        other => other.to_string(),
    }
}

/// Whether a server-side `CASE ... THEN 1 ELSE 0 END` flag is set.
pub(crate) fn is_flag_set(value: &SqlValue) -> bool {
    match value {
        SqlValue::Bool(b) => *b,
        SqlValue::Text(s) => s == "1",
        other => other.as_f64().is_some_and(|f| f != 0.0),
    }
}

/// Commit or roll back the open transaction.
pub(crate) async fn finish(conn: &mut dyn Connection, commit: bool) -> Result<()> {
    if commit {
        conn.commit().await
    } else {
        debug!("Dry run: rolling back");
        conn.rollback().await
    }
}

/// Roll back after a failed statement; a failing rollback is only logged.
pub(crate) async fn rollback_quietly(conn: &mut dyn Connection) {
    if let Err(e) = conn.rollback().await {
        warn!("Rollback failed: {}", e);
    }
}

/// Turn a failed write into a `Mutation` error classified by the driver text.
pub(crate) fn mutation_error(err: QualityError) -> QualityError {
    match err {
        QualityError::Database { message, .. } => {
            let kind = classify_driver_message(&message);
            warn!("Update rolled back ({:?}): {}", kind, message);
            QualityError::mutation(kind, message)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::make_test_column;
    use crate::error::ViolationKind;

    #[test]
    fn test_parse_for_integer_bucket() {
        let col = make_test_column("n", "int", TypeBucket::Integer);
        assert_eq!(parse_for_bucket(&col, "3"), Some(SqlValue::Int(3)));
        assert_eq!(parse_for_bucket(&col, "-4.00"), Some(SqlValue::Int(-4)));
        assert_eq!(parse_for_bucket(&col, "4.5"), None);
        assert_eq!(parse_for_bucket(&col, "Jo"), None);
    }

    #[test]
    fn test_parse_for_boolean_bucket() {
        let col = make_test_column("b", "tinyint(1)", TypeBucket::Boolean);
        assert_eq!(parse_for_bucket(&col, "TRUE"), Some(SqlValue::Bool(true)));
        assert_eq!(parse_for_bucket(&col, "0"), Some(SqlValue::Bool(false)));
        assert_eq!(parse_for_bucket(&col, "yes"), None);
    }

    #[test]
    fn test_coerce_falls_back_to_text() {
        let col = make_test_column("n", "numeric", TypeBucket::Decimal);
        assert_eq!(
            coerce_for_bucket(&col, "2.50"),
            SqlValue::Decimal("2.50".parse().unwrap())
        );
        assert_eq!(coerce_for_bucket(&col, "n/a"), SqlValue::Text("n/a".into()));
    }

    #[test]
    fn test_mutation_error_classifies_database_errors() {
        let err = mutation_error(QualityError::database(
            "duplicate key value violates unique constraint \"studenten_pkey\"",
            "UPDATE",
        ));
        assert!(matches!(
            err,
            QualityError::Mutation {
                kind: ViolationKind::Unique,
                ..
            }
        ));

        let passthrough = mutation_error(QualityError::QueryBuild("bad".into()));
        assert!(matches!(passthrough, QualityError::QueryBuild(_)));
    }

    #[test]
    fn test_flags_and_counts() {
        assert!(is_flag_set(&SqlValue::Int(1)));
        assert!(!is_flag_set(&SqlValue::Int(0)));
        assert!(is_flag_set(&SqlValue::Bool(true)));
        assert_eq!(as_count(&SqlValue::Int(7)), 7);
        assert_eq!(as_count(&SqlValue::Decimal(Decimal::from(9))), 9);
        assert_eq!(as_count(&SqlValue::Null), 0);
    }
}
