//! Substring search across one or many columns.

use tracing::{debug, instrument};

use crate::core::schema::{ColumnSelection, TableSchema};
use crate::core::traits::{Connector, Statement};
use crate::core::value::ResultSet;
use crate::error::Result;

use super::{column_list, primary_key_list, table_ref};

pub struct SearchEngine<'a> {
    connector: &'a dyn Connector,
    schema: &'a TableSchema,
}

impl<'a> SearchEngine<'a> {
    pub fn new(connector: &'a dyn Connector, schema: &'a TableSchema) -> Self {
        Self { connector, schema }
    }

    /// Statement returning every row where any selected column contains
    /// `pattern` literally. Non-text columns are compared as text.
    pub fn build_query(&self, columns: &ColumnSelection, pattern: &str) -> Result<Statement> {
        let dialect = self.schema.dialect;
        let predicates = self
            .schema
            .resolve(columns)?
            .into_iter()
            .map(|column| dialect.search_predicate(column, ":pattern"))
            .collect::<Vec<_>>();

        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            column_list(self.schema),
            table_ref(self.schema),
            predicates.join(" OR "),
            primary_key_list(self.schema, None)
        );
        Ok(Statement::new(sql).bind("pattern", dialect.escape_pattern(pattern)))
    }

    /// All matching rows, without a row limit.
    #[instrument(skip(self), fields(table = %self.schema.name))]
    pub async fn search(&self, columns: &ColumnSelection, pattern: &str) -> Result<ResultSet> {
        let statement = self.build_query(columns, pattern)?;
        let mut conn = self.connector.acquire().await?;
        let rows = conn.execute(&statement).await?.into_result_set();
        debug!("Search for '{}' matched {} rows", pattern, rows.len());
        Ok(rows)
    }
}
