//! Connection abstractions the engines execute against.
//!
//! - [`Connector`]: pool-backed factory that knows where it connects to
//! - [`Connection`]: one acquired connection with transaction control
//! - [`Statement`]: SQL text with `:name` placeholders and bound values
//!
//! Each engine call acquires exactly one [`Connection`] and drops it before
//! returning, so no connection outlives a single operation.

use async_trait::async_trait;
use serde::Serialize;

use crate::dialect::Dialect;
use crate::error::{QualityError, Result};

use super::value::{ResultSet, SqlValue};

/// Where a connector points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTarget {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl ConnectionTarget {
    pub fn new(
        dialect: Dialect,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            host: host.into(),
            port,
            database: database.into(),
        }
    }

    /// Two targets are on the same server if they are identical, or share
    /// dialect, host and port.
    pub fn is_same_server(&self, other: &ConnectionTarget) -> bool {
        self == other
            || (self.dialect == other.dialect
                && self.host.eq_ignore_ascii_case(&other.host)
                && self.port == other.port)
    }
}

/// SQL text with named placeholders (`:name`) and their values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<(String, SqlValue)>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind a named value. Binding the same name twice replaces the value.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    pub fn param(&self, name: &str) -> Option<&SqlValue> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Rewrite `:name` placeholders into the dialect's positional form.
    ///
    /// MariaDB repeats the value for every `?`; PostgreSQL reuses `$n` for a
    /// repeated name. Text inside string literals, quoted identifiers and `::`
    /// casts is copied unchanged.
    pub fn to_positional(&self, dialect: Dialect) -> Result<(String, Vec<SqlValue>)> {
        let mut sql = String::with_capacity(self.sql.len());
        let mut values: Vec<SqlValue> = Vec::new();
        let mut assigned: Vec<&str> = Vec::new();

        let mut chars = self.sql.char_indices().peekable();
        let mut in_string = false;
        let mut in_ident = false;

        while let Some((i, c)) = chars.next() {
            match c {
                '\'' if !in_ident => {
                    in_string = !in_string;
                    sql.push(c);
                }
                '"' if !in_string => {
                    in_ident = !in_ident;
                    sql.push(c);
                }
                ':' if !in_string && !in_ident => match chars.peek() {
                    Some((_, ':')) => {
                        sql.push_str("::");
                        chars.next();
                    }
                    Some((_, next)) if next.is_ascii_alphabetic() || *next == '_' => {
                        let start = i + 1;
                        let mut end = start;
                        while let Some((j, n)) = chars.peek() {
                            if n.is_ascii_alphanumeric() || *n == '_' {
                                end = *j + n.len_utf8();
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        let name = &self.sql[start..end];
                        let value = self.param(name).ok_or_else(|| {
                            QualityError::QueryBuild(format!(
                                "No value bound for parameter :{}",
                                name
                            ))
                        })?;
                        match dialect {
                            Dialect::MariaDb => {
                                values.push(value.clone());
                                sql.push_str(&dialect.param_placeholder(values.len()));
                            }
                            Dialect::Postgres => {
                                let index = match assigned.iter().position(|n| *n == name) {
                                    Some(pos) => pos + 1,
                                    None => {
                                        assigned.push(name);
                                        values.push(value.clone());
                                        assigned.len()
                                    }
                                };
                                sql.push_str(&dialect.param_placeholder(index));
                            }
                        }
                    }
                    _ => sql.push(c),
                },
                _ => sql.push(c),
            }
        }

        Ok((sql, values))
    }
}

/// Rows and affected-row count returned by one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    pub rows_affected: u64,
}

impl QueryResult {
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            columns,
            rows,
            rows_affected: 0,
        }
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Default::default()
        }
    }

    /// First column of the first row.
    pub fn first_value(&self) -> Option<&SqlValue> {
        self.rows.first().and_then(|row| row.first())
    }

    pub fn into_result_set(self) -> ResultSet {
        ResultSet::new(self.columns, self.rows)
    }
}

/// One acquired database connection.
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement and collect all rows.
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult>;

    /// Start a transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<()>;
}

/// Factory for connections to one database.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dialect, host, port and database this connector points to.
    fn target(&self) -> &ConnectionTarget;

    /// Acquire a connection; it is released when dropped.
    async fn acquire(&self) -> Result<Box<dyn Connection>>;

    /// Close the underlying pool.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(dialect: Dialect, host: &str, port: u16, db: &str) -> ConnectionTarget {
        ConnectionTarget::new(dialect, host, port, db)
    }

    #[test]
    fn test_same_server_identical_targets() {
        let a = target(Dialect::Postgres, "db1", 5432, "uni");
        assert!(a.is_same_server(&a.clone()));
    }

    #[test]
    fn test_same_server_other_database() {
        let a = target(Dialect::MariaDb, "db1", 3306, "uni");
        let b = target(Dialect::MariaDb, "db1", 3306, "hr");
        assert!(a.is_same_server(&b));
    }

    #[test]
    fn test_not_same_server() {
        let a = target(Dialect::MariaDb, "db1", 3306, "uni");
        assert!(!a.is_same_server(&target(Dialect::MariaDb, "db2", 3306, "uni")));
        assert!(!a.is_same_server(&target(Dialect::MariaDb, "db1", 3307, "uni")));
        assert!(!a.is_same_server(&target(Dialect::Postgres, "db1", 3306, "uni")));
    }

    #[test]
    fn test_bind_replaces_existing_value() {
        let stmt = Statement::new("SELECT :a").bind("a", 1i64).bind("a", 2i64);
        assert_eq!(stmt.params.len(), 1);
        assert_eq!(stmt.param("a"), Some(&SqlValue::Int(2)));
    }

    #[test]
    fn test_positional_mariadb_repeats_values() {
        let stmt = Statement::new("SELECT * FROM t WHERE a = :v OR b = :v AND c = :w")
            .bind("v", "x")
            .bind("w", 3i64);
        let (sql, values) = stmt.to_positional(Dialect::MariaDb).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? OR b = ? AND c = ?");
        assert_eq!(
            values,
            vec![SqlValue::from("x"), SqlValue::from("x"), SqlValue::Int(3)]
        );
    }

    #[test]
    fn test_positional_postgres_reuses_index() {
        let stmt = Statement::new("SELECT * FROM t WHERE a = :v OR b = :v AND c = :w")
            .bind("v", "x")
            .bind("w", 3i64);
        let (sql, values) = stmt.to_positional(Dialect::Postgres).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 OR b = $1 AND c = $2");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_positional_skips_literals_and_casts() {
        let stmt = Statement::new(
            "SELECT '%:x%', \"a:b\", c::text FROM t WHERE d = :value_0",
        )
        .bind("value_0", 1i64);
        let (sql, values) = stmt.to_positional(Dialect::Postgres).unwrap();
        assert_eq!(
            sql,
            "SELECT '%:x%', \"a:b\", c::text FROM t WHERE d = $1"
        );
        assert_eq!(values, vec![SqlValue::Int(1)]);
    }

    #[test]
    fn test_positional_missing_param_fails() {
        let stmt = Statement::new("SELECT :missing");
        assert!(matches!(
            stmt.to_positional(Dialect::MariaDb),
            Err(QualityError::QueryBuild(_))
        ));
    }
}
