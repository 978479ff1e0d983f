//! Schema loading and whole-table reads.

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::core::identifier::validate_identifier;
use crate::core::schema::{ColumnInfo, TableSchema};
use crate::core::traits::{Connection, Connector, Statement};
use crate::core::value::{ResultSet, SqlValue};
use crate::dialect::typemap;
use crate::dialect::Dialect;
use crate::error::{QualityError, Result};

use super::{as_count, as_string, column_list, primary_key_list, table_ref};

const MARIADB_COLUMNS: &str = r#"
    SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE,
           CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = :table
    ORDER BY ORDINAL_POSITION
"#;

const POSTGRES_COLUMNS: &str = r#"
    SELECT column_name::text, data_type::text, is_nullable::text,
           character_maximum_length::int4, numeric_precision::int4, numeric_scale::int4
    FROM information_schema.columns
    WHERE table_schema = current_schema() AND table_name::text = :table
    ORDER BY ordinal_position
"#;

const MARIADB_PRIMARY_KEY: &str = r#"
    SELECT COLUMN_NAME
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = :table
      AND CONSTRAINT_NAME = 'PRIMARY'
    ORDER BY ORDINAL_POSITION
"#;

const POSTGRES_PRIMARY_KEY: &str = r#"
    SELECT a.attname::text
    FROM pg_index i
    JOIN pg_class c ON c.oid = i.indrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord) ON true
    JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
    WHERE i.indisprimary AND n.nspname = current_schema() AND c.relname::text = :table
    ORDER BY k.ord
"#;

const MARIADB_TABLES: &str = r#"
    SELECT TABLE_NAME
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME
"#;

const POSTGRES_TABLES: &str = r#"
    SELECT table_name::text
    FROM information_schema.tables
    WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
    ORDER BY table_name
"#;

/// First rows of one table.
#[derive(Debug, Clone, Serialize)]
pub struct TablePreview {
    pub name: String,
    pub rows: ResultSet,
}

/// Every base table of the connected database with a short preview.
#[derive(Debug, Clone, Serialize)]
pub struct TableOverview {
    pub tables: Vec<TablePreview>,
    /// Tables the engines cannot work on.
    pub without_primary_key: Vec<String>,
}

/// Reads table metadata through a connector.
pub struct MetadataLoader<'a> {
    connector: &'a dyn Connector,
}

impl<'a> MetadataLoader<'a> {
    pub fn new(connector: &'a dyn Connector) -> Self {
        Self { connector }
    }

    fn dialect(&self) -> Dialect {
        self.connector.target().dialect
    }

    /// Build the schema snapshot of `table`.
    #[instrument(skip(self), fields(database = %self.connector.target().database))]
    pub async fn load_table(&self, table: &str) -> Result<TableSchema> {
        validate_identifier(table)?;
        let dialect = self.dialect();
        let mut conn = self.connector.acquire().await?;

        let columns = load_columns(conn.as_mut(), dialect, table).await?;
        if columns.is_empty() {
            return Err(QualityError::QueryBuild(format!(
                "Table '{}' does not exist in database '{}'",
                table,
                self.connector.target().database
            )));
        }
        let primary_key = load_primary_key(conn.as_mut(), dialect, table).await?;

        let count_sql = format!("SELECT COUNT(*) FROM {}", dialect.quote_ident(table));
        let row_count = conn
            .execute(&Statement::new(count_sql))
            .await?
            .first_value()
            .map(as_count)
            .unwrap_or(0);

        let schema = TableSchema::new(
            dialect,
            self.connector.target().database.clone(),
            table,
            columns,
            primary_key,
            row_count,
        )?;
        info!(
            "Loaded {}: {} columns, {} rows, primary key ({})",
            schema.name,
            schema.columns().len(),
            schema.row_count,
            schema.primary_key().join(", ")
        );
        Ok(schema)
    }

    /// All base tables with their first `preview_rows` rows, plus the names of
    /// tables lacking a primary key.
    #[instrument(skip(self))]
    pub async fn list_tables(&self, preview_rows: usize) -> Result<TableOverview> {
        let dialect = self.dialect();
        let mut conn = self.connector.acquire().await?;

        let names_sql = match dialect {
            Dialect::MariaDb => MARIADB_TABLES,
            Dialect::Postgres => POSTGRES_TABLES,
        };
        let names: Vec<String> = conn
            .execute(&Statement::new(names_sql))
            .await?
            .rows
            .iter()
            .filter_map(|row| row.first().map(as_string))
            .collect();

        let limit = i64::try_from(preview_rows).unwrap_or(i64::MAX);
        let mut overview = TableOverview {
            tables: Vec::with_capacity(names.len()),
            without_primary_key: Vec::new(),
        };
        for name in names {
            let primary_key = load_primary_key(conn.as_mut(), dialect, &name).await?;
            let order = if primary_key.is_empty() {
                overview.without_primary_key.push(name.clone());
                String::new()
            } else {
                let keys = primary_key
                    .iter()
                    .map(|pk| dialect.quote_ident(pk))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" ORDER BY {}", keys)
            };
            let sql = format!(
                "SELECT * FROM {}{} LIMIT :limit",
                dialect.quote_ident(&name),
                order
            );
            let rows = conn
                .execute(&Statement::new(sql).bind("limit", limit))
                .await?
                .into_result_set();
            overview.tables.push(TablePreview { name, rows });
        }

        debug!(
            "Listed {} tables, {} without primary key",
            overview.tables.len(),
            overview.without_primary_key.len()
        );
        Ok(overview)
    }

    /// Every row of the table ordered by primary key.
    #[instrument(skip(self, schema), fields(table = %schema.name))]
    pub async fn fetch_all(&self, schema: &TableSchema) -> Result<ResultSet> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            column_list(schema),
            table_ref(schema),
            primary_key_list(schema, None)
        );
        let mut conn = self.connector.acquire().await?;
        Ok(conn.execute(&Statement::new(sql)).await?.into_result_set())
    }

    /// Character set of the connected database.
    pub async fn database_encoding(&self) -> Result<String> {
        let mut conn = self.connector.acquire().await?;
        fetch_encoding(conn.as_mut(), self.dialect()).await
    }
}

/// Character set of the database `conn` is connected to.
pub(crate) async fn fetch_encoding(conn: &mut dyn Connection, dialect: Dialect) -> Result<String> {
    let (sql, value_index) = match dialect {
        Dialect::MariaDb => ("SHOW VARIABLES LIKE 'character_set_database'", 1),
        Dialect::Postgres => (
            "SELECT pg_encoding_to_char(encoding)::text FROM pg_database \
             WHERE datname = current_database()",
            0,
        ),
    };
    let result = conn.execute(&Statement::new(sql)).await?;
    result
        .rows
        .first()
        .and_then(|row| row.get(value_index))
        .map(as_string)
        .ok_or_else(|| QualityError::database("no encoding reported", sql))
}

async fn load_columns(
    conn: &mut dyn Connection,
    dialect: Dialect,
    table: &str,
) -> Result<Vec<ColumnInfo>> {
    let sql = match dialect {
        Dialect::MariaDb => MARIADB_COLUMNS,
        Dialect::Postgres => POSTGRES_COLUMNS,
    };
    let result = conn
        .execute(&Statement::new(sql).bind("table", table))
        .await?;

    result
        .rows
        .iter()
        .map(|row| -> Result<ColumnInfo> {
            let field = |i: usize| row.get(i).cloned().unwrap_or(SqlValue::Null);
            let name = as_string(&field(0));
            let native_type = as_string(&field(1));
            let nullable = as_string(&field(2)).eq_ignore_ascii_case("YES");
            let info = typemap::classify(dialect, &native_type)?;

            Ok(ColumnInfo {
                name,
                bucket: info.bucket,
                is_nullable: nullable && info.nullable != Some(false),
                max_length: if info.bucket.is_text() {
                    as_u32(&field(3)).or(info.max_length)
                } else {
                    None
                },
                precision: as_u32(&field(4)),
                scale: as_u32(&field(5)),
                native_type,
            })
        })
        .collect()
}

async fn load_primary_key(
    conn: &mut dyn Connection,
    dialect: Dialect,
    table: &str,
) -> Result<Vec<String>> {
    let sql = match dialect {
        Dialect::MariaDb => MARIADB_PRIMARY_KEY,
        Dialect::Postgres => POSTGRES_PRIMARY_KEY,
    };
    let result = conn
        .execute(&Statement::new(sql).bind("table", table))
        .await?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.first().map(as_string))
        .collect())
}

fn as_u32(value: &SqlValue) -> Option<u32> {
    match value {
        SqlValue::Null => None,
        other => u32::try_from(as_count(other)).ok(),
    }
}

/// Join `col = :col_param` equality predicates with `AND` or `OR`.
///
/// Parameters are named `w0`, `w1`, ... in column order. A single column needs
/// no operator; more than one requires `AND` or `OR`.
pub fn build_condition(dialect: Dialect, columns: &[&str], operator: Option<&str>) -> Result<String> {
    if columns.is_empty() {
        return Err(QualityError::QueryBuild(
            "A condition needs at least one column".to_string(),
        ));
    }
    let joiner = match operator.map(|op| op.trim().to_uppercase()) {
        None if columns.len() > 1 => {
            return Err(QualityError::QueryBuild(format!(
                "An operator (AND or OR) is required to combine {} columns",
                columns.len()
            )))
        }
        None => String::new(),
        Some(op) if op == "AND" || op == "OR" => op,
        Some(op) => {
            return Err(QualityError::QueryBuild(format!(
                "Unsupported operator '{}' (expected AND or OR)",
                op
            )))
        }
    };

    Ok(columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{} = :w{}", dialect.quote_ident(col), i))
        .collect::<Vec<_>>()
        .join(&format!(" {} ", joiner)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::TypeBucket;
    use crate::core::testing::{int, make_test_schema, text, Event, FakeConnector};

    // ========================================================================
    // build_condition
    // ========================================================================

    #[test]
    fn test_build_condition_single_column() {
        assert_eq!(
            build_condition(Dialect::Postgres, &["Matrikelnummer"], None).unwrap(),
            "\"Matrikelnummer\" = :w0"
        );
    }

    #[test]
    fn test_build_condition_with_operator() {
        assert_eq!(
            build_condition(Dialect::MariaDb, &["a", "b"], Some("and")).unwrap(),
            "\"a\" = :w0 AND \"b\" = :w1"
        );
        assert_eq!(
            build_condition(Dialect::MariaDb, &["a", "b"], Some("OR")).unwrap(),
            "\"a\" = :w0 OR \"b\" = :w1"
        );
    }

    #[test]
    fn test_build_condition_errors() {
        assert!(matches!(
            build_condition(Dialect::MariaDb, &[], Some("AND")),
            Err(QualityError::QueryBuild(_))
        ));
        assert!(matches!(
            build_condition(Dialect::MariaDb, &["a", "b"], None),
            Err(QualityError::QueryBuild(_))
        ));
        assert!(matches!(
            build_condition(Dialect::MariaDb, &["a", "b"], Some("XOR")),
            Err(QualityError::QueryBuild(_))
        ));
    }

    // ========================================================================
    // Loading
    // ========================================================================

    #[tokio::test]
    async fn test_load_table_mariadb() {
        let fake = FakeConnector::new(Dialect::MariaDb);
        fake.push_rows(
            &["COLUMN_NAME", "COLUMN_TYPE", "IS_NULLABLE", "L", "P", "S"],
            vec![
                vec![text("Matrikelnummer"), text("int(11)"), text("NO"), SqlValue::Null, int(10), int(0)],
                vec![text("Vorname"), text("varchar(50)"), text("YES"), int(50), SqlValue::Null, SqlValue::Null],
                vec![text("aktiv"), text("tinyint(1)"), text("YES"), SqlValue::Null, int(3), int(0)],
            ],
        );
        fake.push_rows(&["COLUMN_NAME"], vec![vec![text("Matrikelnummer")]]);
        fake.push_rows(&["COUNT(*)"], vec![vec![int(3)]]);

        let schema = MetadataLoader::new(&fake).load_table("studenten").await.unwrap();

        assert_eq!(schema.column_names(), vec!["Matrikelnummer", "Vorname", "aktiv"]);
        assert_eq!(schema.primary_key(), ["Matrikelnummer".to_string()]);
        assert_eq!(schema.row_count, 3);
        assert_eq!(schema.database, "uni");
        let vorname = schema.column("Vorname").unwrap();
        assert_eq!(vorname.bucket, TypeBucket::Text);
        assert_eq!(vorname.max_length, Some(50));
        assert!(!schema.column("Matrikelnummer").unwrap().is_nullable);
        assert_eq!(schema.column("aktiv").unwrap().bucket, TypeBucket::Boolean);

        let statements = fake.statements();
        assert_eq!(statements[0].param("table"), Some(&text("studenten")));
        assert_eq!(statements[2].sql, "SELECT COUNT(*) FROM \"studenten\"");
    }

    #[tokio::test]
    async fn test_load_table_without_primary_key_fails() {
        let fake = FakeConnector::new(Dialect::Postgres);
        fake.push_rows(
            &["column_name", "data_type", "is_nullable", "l", "p", "s"],
            vec![vec![text("id"), text("integer"), text("YES"), SqlValue::Null, int(32), int(0)]],
        );
        fake.push_rows(&["attname"], vec![]);
        fake.push_rows(&["count"], vec![vec![int(0)]]);

        let err = MetadataLoader::new(&fake).load_table("log").await.unwrap_err();
        assert!(matches!(err, QualityError::QueryBuild(_)));
    }

    #[tokio::test]
    async fn test_load_missing_table() {
        let fake = FakeConnector::new(Dialect::Postgres);
        fake.push_rows(&["column_name"], vec![]);
        let err = MetadataLoader::new(&fake).load_table("nope").await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_load_unknown_type_is_unsupported() {
        let fake = FakeConnector::new(Dialect::Postgres);
        fake.push_rows(
            &["column_name", "data_type", "is_nullable", "l", "p", "s"],
            vec![vec![text("shape"), text("polygon"), text("YES"), SqlValue::Null, SqlValue::Null, SqlValue::Null]],
        );
        let err = MetadataLoader::new(&fake).load_table("shapes").await.unwrap_err();
        assert!(matches!(err, QualityError::UnsupportedType { .. }));
    }

    #[tokio::test]
    async fn test_list_tables_reports_missing_primary_keys() {
        let fake = FakeConnector::new(Dialect::Postgres);
        fake.push_rows(&["table_name"], vec![vec![text("log")], vec![text("studenten")]]);
        fake.push_rows(&["attname"], vec![]);
        fake.push_rows(&["msg"], vec![vec![text("started")]]);
        fake.push_rows(&["attname"], vec![vec![text("Matrikelnummer")]]);
        fake.push_rows(&["Matrikelnummer"], vec![vec![int(1)]]);

        let overview = MetadataLoader::new(&fake).list_tables(5).await.unwrap();
        assert_eq!(overview.tables.len(), 2);
        assert_eq!(overview.without_primary_key, vec!["log".to_string()]);

        let statements = fake.statements();
        assert_eq!(statements[2].sql, "SELECT * FROM \"log\" LIMIT :limit");
        assert_eq!(statements[2].param("limit"), Some(&int(5)));
        assert_eq!(
            statements[4].sql,
            "SELECT * FROM \"studenten\" ORDER BY \"Matrikelnummer\" LIMIT :limit"
        );
        assert_eq!(fake.count(&Event::Acquire), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_orders_by_primary_key() {
        let fake = FakeConnector::new(Dialect::Postgres);
        let schema = make_test_schema(Dialect::Postgres);
        MetadataLoader::new(&fake).fetch_all(&schema).await.unwrap();
        assert_eq!(
            fake.statements()[0].sql,
            "SELECT \"Matrikelnummer\", \"Vorname\", \"Nachname\" FROM \"studenten\" ORDER BY \"Matrikelnummer\""
        );
    }

    #[tokio::test]
    async fn test_database_encoding() {
        let fake = FakeConnector::new(Dialect::MariaDb);
        fake.push_rows(
            &["Variable_name", "Value"],
            vec![vec![text("character_set_database"), text("utf8mb4")]],
        );
        let encoding = MetadataLoader::new(&fake).database_encoding().await.unwrap();
        assert_eq!(encoding, "utf8mb4");
    }
}
