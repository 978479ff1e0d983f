//! Per-dialect SQL syntax policy.
//!
//! [`Dialect`] answers every syntax question the engines ask: how to quote an
//! identifier, which operator performs a pattern match, how to wrap a bound
//! parameter in wildcards, how to escape pattern metacharacters, and how to
//! express casts and regex substitution. Everything here is a pure lookup; no
//! method touches a connection.
//!
//! Type classification lives in [`typemap`].

pub mod typemap;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::identifier;
use crate::core::schema::{ColumnInfo, TypeBucket};
use crate::error::{QualityError, Result};

/// Backslash replacement used by [`Dialect::escape_pattern`] on MariaDB.
///
/// The escaped pattern is sent as a bound parameter of a server-side prepared
/// statement and never re-read as a string literal. `LIKE` is the only layer
/// that unescapes it, so one literal backslash becomes two.
const MARIADB_BACKSLASH: &str = "\\\\";

/// Backslash replacement used by [`Dialect::escape_pattern`] on PostgreSQL.
///
/// Bound parameters with `standard_conforming_strings` on: `LIKE` sees the
/// value as sent.
const POSTGRES_BACKSLASH: &str = "\\\\";

/// Character set of every MariaDB session. Bound text arrives in it, and
/// columns are converted to it before a case-sensitive comparison.
pub const MARIADB_SESSION_CHARSET: &str = "utf8mb4";

/// Text form of a value with no fractional part, after trimming.
const INTEGER_TEXT: &str = "^[-+]?[0-9]+([.]0*)?$";

/// Text form of a decimal number, after trimming.
const DECIMAL_TEXT: &str = "^[-+]?([0-9]+([.][0-9]*)?|[.][0-9]+)$";

/// Characters with special meaning inside a POSIX/PCRE regular expression.
const REGEX_METACHARACTERS: &[char] = &[
    '\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$',
];

/// One of the two supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    #[serde(rename = "mariadb", alias = "mysql")]
    MariaDb,
    #[serde(rename = "postgres", alias = "postgresql")]
    Postgres,
}

impl Dialect {
    /// Parse a dialect name, failing with `UnsupportedDialect`.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "mariadb" | "mysql" => Ok(Dialect::MariaDb),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            _ => Err(QualityError::UnsupportedDialect(name.to_string())),
        }
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::MariaDb => "mariadb",
            Dialect::Postgres => "postgres",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Dialect::MariaDb => 3306,
            Dialect::Postgres => 5432,
        }
    }

    /// Double-quoted identifier; both dialects read it the same way.
    pub fn quote_ident(&self, name: &str) -> String {
        identifier::quote_ident(name)
    }

    /// Positional placeholder for the 1-based parameter `index`.
    pub fn param_placeholder(&self, index: usize) -> String {
        match self {
            Dialect::MariaDb => "?".to_string(),
            Dialect::Postgres => format!("${}", index),
        }
    }

    /// Statements run once on every new connection.
    ///
    /// MariaDB adds `ANSI_QUOTES` to the existing mode so strict mode stays on,
    /// and pins the session to [`MARIADB_SESSION_CHARSET`].
    pub fn session_init(&self) -> &'static [&'static str] {
        match self {
            Dialect::MariaDb => &[
                "SET SESSION sql_mode = CONCAT(@@sql_mode, ',ANSI_QUOTES')",
                "SET NAMES utf8mb4",
            ],
            Dialect::Postgres => &[],
        }
    }

    /// Operator used by search: collation-dependent `LIKE` on MariaDB,
    /// case-insensitive `ILIKE` on PostgreSQL.
    pub fn pattern_operator(&self) -> &'static str {
        match self {
            Dialect::MariaDb => "LIKE",
            Dialect::Postgres => "ILIKE",
        }
    }

    /// Cast target used to compare a non-text column as a string.
    pub fn text_cast_type(&self) -> &'static str {
        match self {
            Dialect::MariaDb => "CHAR",
            Dialect::Postgres => "TEXT",
        }
    }

    /// Wrap a bound parameter (`:name`) in `%` wildcards.
    pub fn wrap_wildcards(&self, param: &str) -> String {
        match self {
            Dialect::MariaDb => format!("CONCAT('%', CONCAT({}, '%'))", param),
            Dialect::Postgres => format!("'%' || {} || '%'", param),
        }
    }

    /// Replacement for one literal backslash in an escaped pattern.
    pub const fn backslash_escape(&self) -> &'static str {
        match self {
            Dialect::MariaDb => MARIADB_BACKSLASH,
            Dialect::Postgres => POSTGRES_BACKSLASH,
        }
    }

    /// Escape a search value for use inside a `LIKE`/`ILIKE` pattern.
    ///
    /// Backslashes are escaped first, then `%`, `_`, `'` and `"`.
    pub fn escape_pattern(&self, value: &str) -> String {
        value
            .replace('\\', self.backslash_escape())
            .replace('%', "\\%")
            .replace('_', "\\_")
            .replace('\'', "\\'")
            .replace('"', "\\\"")
    }

    /// Expression of `column` usable on the left of a pattern match.
    pub fn text_expr(&self, column: &ColumnInfo) -> String {
        let quoted = self.quote_ident(&column.name);
        if column.bucket.is_text() {
            quoted
        } else {
            format!("CAST({} AS {})", quoted, self.text_cast_type())
        }
    }

    /// Case-insensitive search predicate for `column` against the bound
    /// parameter `param`.
    pub fn search_predicate(&self, column: &ColumnInfo, param: &str) -> String {
        format!(
            "{} {} {}",
            self.text_expr(column),
            self.pattern_operator(),
            self.wrap_wildcards(param)
        )
    }

    /// Case-sensitive substring predicate matching what `regexp_replace`
    /// will change.
    ///
    /// On MariaDB the column is converted to the session character set and
    /// compared under its binary collation. That holds whatever character
    /// set the database or column was created with.
    pub fn exact_substring_predicate(&self, expr: &str, param: &str) -> String {
        match self {
            Dialect::MariaDb => format!(
                "CONVERT({} USING {}) LIKE {} COLLATE {}_bin",
                expr,
                MARIADB_SESSION_CHARSET,
                self.wrap_wildcards(param),
                MARIADB_SESSION_CHARSET
            ),
            Dialect::Postgres => format!("{} LIKE {}", expr, self.wrap_wildcards(param)),
        }
    }

    /// `regexp_replace` call; only PostgreSQL needs the global flag.
    pub fn regexp_replace(&self, expr: &str, pattern_param: &str, replacement_param: &str) -> String {
        match self {
            Dialect::MariaDb => format!(
                "REGEXP_REPLACE({}, {}, {})",
                expr, pattern_param, replacement_param
            ),
            Dialect::Postgres => format!(
                "regexp_replace({}, {}, {}, 'g')",
                expr, pattern_param, replacement_param
            ),
        }
    }

    /// Regex matching `literal` verbatim and case-sensitively.
    pub fn literal_regex(&self, literal: &str) -> String {
        let mut escaped = String::with_capacity(literal.len() + 8);
        if matches!(self, Dialect::MariaDb) {
            escaped.push_str("(?-i)");
        }
        for c in literal.chars() {
            if REGEX_METACHARACTERS.contains(&c) {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }

    /// Replacement text for `regexp_replace` that inserts `value` verbatim.
    pub fn literal_replacement(&self, value: &str) -> String {
        value.replace('\\', "\\\\")
    }

    /// Type name usable as a `CAST` target for values of `column`.
    pub fn cast_target(&self, column: &ColumnInfo) -> String {
        let native = typemap::NativeType::parse(&column.native_type);
        match self {
            Dialect::MariaDb => match column.bucket {
                TypeBucket::Integer if native.unsigned => "UNSIGNED".to_string(),
                TypeBucket::Integer | TypeBucket::Boolean => "SIGNED".to_string(),
                TypeBucket::Decimal => match native.base.as_str() {
                    "decimal" | "dec" | "numeric" | "fixed" => {
                        match (column.precision, column.scale) {
                            (Some(p), Some(s)) => format!("DECIMAL({},{})", p, s),
                            (Some(p), None) => format!("DECIMAL({})", p),
                            _ => "DECIMAL(65,30)".to_string(),
                        }
                    }
                    _ => "DOUBLE".to_string(),
                },
                TypeBucket::Text => "CHAR".to_string(),
                TypeBucket::Date => match native.base.as_str() {
                    "date" => "DATE".to_string(),
                    "time" => "TIME".to_string(),
                    "year" => "SIGNED".to_string(),
                    _ => "DATETIME".to_string(),
                },
            },
            Dialect::Postgres => match native.base.as_str() {
                "serial" | "serial4" => "integer".to_string(),
                "bigserial" | "serial8" => "bigint".to_string(),
                "smallserial" | "serial2" => "smallint".to_string(),
                _ => column.native_type.clone(),
            },
        }
    }

    /// `CAST(expr AS <column's type>)`.
    pub fn cast_to(&self, expr: &str, column: &ColumnInfo) -> String {
        format!("CAST({} AS {})", expr, self.cast_target(column))
    }

    /// `CAST(expr AS <column's type>)` that yields NULL instead of failing or
    /// coercing when `expr` has no value in the column's bucket.
    ///
    /// PostgreSQL would abort the statement on a bad cast and MariaDB would
    /// silently turn `'x9'` into `0`. The guard tests the trimmed text form
    /// first, so such keys match nothing.
    pub fn guarded_cast_to(&self, expr: &str, column: &ColumnInfo) -> String {
        let as_text = format!("TRIM(CAST({} AS {}))", expr, self.text_cast_type());
        let regex_op = match self {
            Dialect::MariaDb => "REGEXP",
            Dialect::Postgres => "~",
        };
        match column.bucket {
            TypeBucket::Integer => {
                let value = match self {
                    // numeric first: PostgreSQL rejects '4.0' as an integer
                    Dialect::Postgres => {
                        format!("CAST(CAST({} AS numeric) AS {})", expr, self.cast_target(column))
                    }
                    Dialect::MariaDb => self.cast_to(expr, column),
                };
                format!(
                    "CASE WHEN {} {} '{}' THEN {} END",
                    as_text, regex_op, INTEGER_TEXT, value
                )
            }
            TypeBucket::Decimal => format!(
                "CASE WHEN {} {} '{}' THEN {} END",
                as_text,
                regex_op,
                DECIMAL_TEXT,
                self.cast_to(expr, column)
            ),
            TypeBucket::Boolean => format!(
                "CASE WHEN LOWER({t}) IN ('true', '1') THEN TRUE \
                 WHEN LOWER({t}) IN ('false', '0') THEN FALSE END",
                t = as_text
            ),
            TypeBucket::Text | TypeBucket::Date => self.cast_to(expr, column),
        }
    }

    /// Whether `FULL OUTER JOIN` is available natively.
    pub fn has_full_outer_join(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self> {
        Dialect::from_name(s)
    }
}
