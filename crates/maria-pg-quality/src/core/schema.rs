//! Table metadata types.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{QualityError, Result};

use super::identifier::validate_identifier;

/// Canonical type category a native column type is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeBucket {
    Text,
    Integer,
    Decimal,
    Boolean,
    /// Dates, times and timestamps.
    Date,
}

impl TypeBucket {
    pub fn name(&self) -> &'static str {
        match self {
            TypeBucket::Text => "text",
            TypeBucket::Integer => "integer",
            TypeBucket::Decimal => "decimal",
            TypeBucket::Boolean => "boolean",
            TypeBucket::Date => "date",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, TypeBucket::Text)
    }

    /// Integer, decimal or boolean.
    pub fn is_numeric_family(&self) -> bool {
        matches!(
            self,
            TypeBucket::Integer | TypeBucket::Decimal | TypeBucket::Boolean
        )
    }
}

impl fmt::Display for TypeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Native type as reported by the server (`int(11)`, `character varying`).
    pub native_type: String,

    /// Canonical bucket.
    pub bucket: TypeBucket,

    /// Whether NULL is allowed.
    pub is_nullable: bool,

    /// Character limit for text columns, `None` when unbounded.
    pub max_length: Option<u32>,

    /// Numeric precision.
    pub precision: Option<u32>,

    /// Numeric scale.
    pub scale: Option<u32>,
}

/// Snapshot of one table's structure.
///
/// Built once when a table is selected and rebuilt, never mutated, when the
/// underlying table may have changed.
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    /// Dialect of the server the table lives on.
    pub dialect: Dialect,

    /// Database (MariaDB) or catalog (PostgreSQL) name.
    pub database: String,

    /// Table name.
    pub name: String,

    columns: Vec<ColumnInfo>,

    primary_key: Vec<String>,

    /// Row count at load time.
    pub row_count: u64,
}

impl TableSchema {
    /// Build a schema, checking that column names are valid and unique and that
    /// the primary key is a non-empty subset of the columns.
    pub fn new(
        dialect: Dialect,
        database: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<ColumnInfo>,
        primary_key: Vec<String>,
        row_count: u64,
    ) -> Result<Self> {
        let name = name.into();
        validate_identifier(&name)?;

        if columns.is_empty() {
            return Err(QualityError::QueryBuild(format!(
                "Table '{}' has no columns",
                name
            )));
        }

        let mut seen = HashSet::new();
        for col in &columns {
            validate_identifier(&col.name)?;
            if !seen.insert(col.name.as_str()) {
                return Err(QualityError::QueryBuild(format!(
                    "Table '{}' lists column '{}' twice",
                    name, col.name
                )));
            }
        }

        if primary_key.is_empty() {
            return Err(QualityError::QueryBuild(format!(
                "Table '{}' has no primary key",
                name
            )));
        }
        for pk in &primary_key {
            if !seen.contains(pk.as_str()) {
                return Err(QualityError::UnsupportedColumn {
                    table: name,
                    column: pk.clone(),
                });
            }
        }

        Ok(Self {
            dialect,
            database: database.into(),
            name,
            columns,
            primary_key,
            row_count,
        })
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Primary-key column names in key order.
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Look up a column, failing with `UnsupportedColumn`.
    pub fn column(&self, name: &str) -> Result<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| self.unsupported(name))
    }

    /// Position of a column in table order.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| self.unsupported(name))
    }

    /// Positions of the primary-key columns, in key order.
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|pk| self.columns.iter().position(|c| &c.name == pk))
            .collect()
    }

    /// Resolve a column selection to column metadata in table order.
    pub fn resolve(&self, selection: &ColumnSelection) -> Result<Vec<&ColumnInfo>> {
        match selection {
            ColumnSelection::All => Ok(self.columns.iter().collect()),
            ColumnSelection::Only(names) => {
                if names.is_empty() {
                    return Err(QualityError::QueryBuild(
                        "At least one column must be selected".to_string(),
                    ));
                }
                for name in names {
                    self.column(name)?;
                }
                Ok(self
                    .columns
                    .iter()
                    .filter(|c| names.iter().any(|n| n == &c.name))
                    .collect())
            }
        }
    }

    fn unsupported(&self, column: &str) -> QualityError {
        QualityError::UnsupportedColumn {
            table: self.name.clone(),
            column: column.to_string(),
        }
    }
}

/// Which columns an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSelection {
    /// Every column of the table.
    All,
    /// The named columns; applied in table order.
    Only(Vec<String>),
}

impl ColumnSelection {
    pub fn one(name: impl Into<String>) -> Self {
        ColumnSelection::Only(vec![name.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{make_test_column, make_test_schema};

    #[test]
    fn test_schema_rejects_missing_primary_key() {
        let cols = vec![make_test_column("id", "int", TypeBucket::Integer)];
        let result = TableSchema::new(Dialect::MariaDb, "uni", "t", cols, vec![], 0);
        assert!(matches!(result, Err(QualityError::QueryBuild(_))));
    }

    #[test]
    fn test_schema_rejects_pk_outside_columns() {
        let cols = vec![make_test_column("id", "int", TypeBucket::Integer)];
        let result = TableSchema::new(
            Dialect::MariaDb,
            "uni",
            "t",
            cols,
            vec!["nr".to_string()],
            0,
        );
        assert!(matches!(
            result,
            Err(QualityError::UnsupportedColumn { .. })
        ));
    }

    #[test]
    fn test_schema_rejects_duplicate_columns() {
        let cols = vec![
            make_test_column("id", "int", TypeBucket::Integer),
            make_test_column("id", "int", TypeBucket::Integer),
        ];
        let result =
            TableSchema::new(Dialect::Postgres, "uni", "t", cols, vec!["id".into()], 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_column_lookup() {
        let schema = make_test_schema(Dialect::MariaDb);
        assert_eq!(schema.column_index("Vorname").unwrap(), 1);
        assert!(matches!(
            schema.column("missing"),
            Err(QualityError::UnsupportedColumn { .. })
        ));
        assert_eq!(schema.primary_key_indices(), vec![0]);
    }

    #[test]
    fn test_resolve_keeps_table_order() {
        let schema = make_test_schema(Dialect::MariaDb);
        let selection =
            ColumnSelection::Only(vec!["Nachname".to_string(), "Vorname".to_string()]);
        let names: Vec<_> = schema
            .resolve(&selection)
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["Vorname", "Nachname"]);
    }

    #[test]
    fn test_resolve_empty_selection_fails() {
        let schema = make_test_schema(Dialect::MariaDb);
        assert!(schema.resolve(&ColumnSelection::Only(vec![])).is_err());
    }
}
