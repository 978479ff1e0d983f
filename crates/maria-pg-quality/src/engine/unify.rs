//! Merging several distinct values of a column into one.

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::core::schema::TableSchema;
use crate::core::traits::{Connector, Statement};
use crate::core::value::SqlValue;
use crate::error::{QualityError, Result};

use super::validate::Validator;
use super::{
    as_count, bind_values, finish, mutation_error, primary_key_list, rollback_quietly,
    table_ref, value_condition, whole_value_update,
};

/// A distinct value and how many rows hold it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistinctValue {
    pub value: SqlValue,
    pub count: u64,
}

pub struct UnifyEngine<'a> {
    connector: &'a dyn Connector,
    schema: &'a TableSchema,
}

impl<'a> UnifyEngine<'a> {
    pub fn new(connector: &'a dyn Connector, schema: &'a TableSchema) -> Self {
        Self { connector, schema }
    }

    /// Every distinct value of `column` with its row count, in the order the
    /// grouping query returns them.
    #[instrument(skip(self), fields(table = %self.schema.name))]
    pub async fn list_distinct(&self, column: &str) -> Result<Vec<DistinctValue>> {
        let quoted = self.schema.dialect.quote_ident(&self.schema.column(column)?.name);
        let sql = format!(
            "SELECT {}, COUNT(*) AS cnt FROM {} GROUP BY {}",
            quoted,
            table_ref(self.schema),
            quoted
        );
        let mut conn = self.connector.acquire().await?;
        let result = conn.execute(&Statement::new(sql)).await?;
        Ok(result
            .rows
            .into_iter()
            .map(|mut row| {
                let count = row.get(1).map(as_count).unwrap_or(0);
                row.truncate(1);
                DistinctValue {
                    value: row.pop().unwrap_or(SqlValue::Null),
                    count,
                }
            })
            .collect())
    }

    /// Replace every occurrence of the `old_values` in `column` with `new`.
    ///
    /// The new value is validated first by simulating this exact update; a
    /// rejected value fails with [`QualityError::Validation`] carrying the
    /// verdict. Returns the number of rows updated.
    #[instrument(skip(self, old_values), fields(table = %self.schema.name, values = old_values.len()))]
    pub async fn unify(
        &self,
        column: &str,
        old_values: &[String],
        new: &str,
        commit: bool,
    ) -> Result<u64> {
        let info = self.schema.column(column)?;
        if old_values.is_empty() {
            return Err(QualityError::QueryBuild(
                "At least one value to unify is required".to_string(),
            ));
        }

        Validator::new(self.connector, self.schema)
            .validate_unification(column, new, old_values)
            .await?
            .into_result()?;

        let statement = whole_value_update(self.schema, info, old_values, new);
        debug!("Unify: {}", statement.sql);

        let mut conn = self.connector.acquire().await?;
        conn.begin().await?;
        let updated = match conn.execute(&statement).await {
            Ok(result) => result.rows_affected,
            Err(e) => {
                rollback_quietly(conn.as_mut()).await;
                return Err(mutation_error(e));
            }
        };
        finish(conn.as_mut(), commit).await?;

        info!(
            "Unified {} values of {} into '{}' in {} rows{}",
            old_values.len(),
            info.name,
            new,
            updated,
            if commit { "" } else { " (dry run)" }
        );
        Ok(updated)
    }

    /// 1-based row numbers, ordered by primary key, of the rows whose
    /// `column` holds one of `old_values`.
    #[instrument(skip(self, old_values), fields(table = %self.schema.name))]
    pub async fn affected_rows(&self, column: &str, old_values: &[String]) -> Result<Vec<u64>> {
        let info = self.schema.column(column)?;
        if old_values.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT row_no FROM (SELECT ROW_NUMBER() OVER (ORDER BY {}) AS row_no, {} FROM {}) sub \
             WHERE {} ORDER BY row_no",
            primary_key_list(self.schema, None),
            self.schema.dialect.quote_ident(&info.name),
            table_ref(self.schema),
            value_condition(self.schema.dialect, info, old_values.len())
        );
        let statement = bind_values(Statement::new(sql), info, old_values);

        let mut conn = self.connector.acquire().await?;
        let result = conn.execute(&statement).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.first().map(as_count))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::TypeBucket;
    use crate::core::testing::{
        int, make_reserved_schema, make_test_column, text, Event, FakeConnector,
    };
    use crate::dialect::Dialect;
    use crate::engine::validate::Verdict;

    fn semester_schema(dialect: Dialect) -> TableSchema {
        let mut pk = make_test_column("Matrikelnummer", "int", TypeBucket::Integer);
        pk.is_nullable = false;
        TableSchema::new(
            dialect,
            "uni",
            "studenten",
            vec![pk, make_test_column("Semester", "int", TypeBucket::Integer)],
            vec!["Matrikelnummer".to_string()],
            4,
        )
        .unwrap()
    }

    fn values(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_list_distinct() {
        let fake = FakeConnector::new(Dialect::MariaDb);
        let schema = semester_schema(Dialect::MariaDb);
        fake.push_rows(
            &["Semester", "cnt"],
            vec![vec![int(3), int(2)], vec![int(4), int(1)], vec![SqlValue::Null, int(1)]],
        );

        let distinct = UnifyEngine::new(&fake, &schema)
            .list_distinct("Semester")
            .await
            .unwrap();
        assert_eq!(
            distinct,
            vec![
                DistinctValue { value: int(3), count: 2 },
                DistinctValue { value: int(4), count: 1 },
                DistinctValue { value: SqlValue::Null, count: 1 },
            ]
        );
        assert_eq!(
            fake.statements()[0].sql,
            "SELECT \"Semester\", COUNT(*) AS cnt FROM \"studenten\" GROUP BY \"Semester\""
        );
    }

    #[tokio::test]
    async fn test_preview_then_unify_three_and_four_into_five() {
        let fake = FakeConnector::new(Dialect::Postgres);
        let schema = semester_schema(Dialect::Postgres);
        let engine = UnifyEngine::new(&fake, &schema);
        let old = values(&["3", "4"]);

        fake.push_rows(&["row_no"], vec![vec![int(1)], vec![int(3)], vec![int(4)]]);
        let preview = engine.affected_rows("Semester", &old).await.unwrap();
        assert_eq!(preview, vec![1, 3, 4]);
        let preview_sql = &fake.statements()[0];
        assert_eq!(
            preview_sql.sql,
            "SELECT row_no FROM (SELECT ROW_NUMBER() OVER (ORDER BY \"Matrikelnummer\") AS row_no, \
             \"Semester\" FROM \"studenten\") sub WHERE \"Semester\" = :v0 OR \"Semester\" = :v1 \
             ORDER BY row_no"
        );

        // lookup, trial update, unify update
        fake.push_rows(&["Semester"], vec![vec![int(3)]]);
        fake.push_affected(1);
        fake.push_affected(3);
        let updated = engine.unify("Semester", &old, "5", true).await.unwrap();
        assert_eq!(updated, 3);

        let update = fake.statements().pop().unwrap();
        assert_eq!(
            update.sql,
            "UPDATE \"studenten\" SET \"Semester\" = :new WHERE \"Semester\" = :v0 OR \"Semester\" = :v1"
        );
        assert_eq!(update.param("v0"), Some(&int(3)));
        assert_eq!(update.param("v1"), Some(&int(4)));
        assert_eq!(update.param("new"), Some(&int(5)));
        assert_eq!(fake.count(&Event::Commit), 1);
        // only the trial update was rolled back
        assert_eq!(fake.count(&Event::Rollback), 1);
    }

    #[tokio::test]
    async fn test_list_distinct_reserved_word_column() {
        let fake = FakeConnector::new(Dialect::Postgres);
        let schema = make_reserved_schema(Dialect::Postgres);
        fake.push_rows(&["user", "cnt"], vec![vec![text("alice"), int(1)]]);

        let distinct = UnifyEngine::new(&fake, &schema)
            .list_distinct("user")
            .await
            .unwrap();
        assert_eq!(distinct, vec![DistinctValue { value: text("alice"), count: 1 }]);
        assert_eq!(
            fake.statements()[0].sql,
            "SELECT \"user\", COUNT(*) AS cnt FROM \"konten\" GROUP BY \"user\""
        );
    }

    #[tokio::test]
    async fn test_unify_blocked_by_validation() {
        let fake = FakeConnector::new(Dialect::MariaDb);
        let schema = semester_schema(Dialect::MariaDb);
        fake.push_rows(&["Semester"], vec![vec![int(3)]]);
        fake.push_error("CONSTRAINT `semester_range` failed for `uni`.`studenten`");

        let err = UnifyEngine::new(&fake, &schema)
            .unify("Semester", &values(&["3"]), "99", true)
            .await
            .unwrap_err();
        match err {
            QualityError::Validation(Verdict::OtherConstraintViolation { message, .. }) => {
                assert!(message.contains("semester_range"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fake.count(&Event::Commit), 0);
        assert_eq!(fake.statements().len(), 2);
    }

    #[tokio::test]
    async fn test_unify_rejects_bad_literal_before_touching_rows() {
        let fake = FakeConnector::new(Dialect::MariaDb);
        let schema = semester_schema(Dialect::MariaDb);
        let err = UnifyEngine::new(&fake, &schema)
            .unify("Semester", &values(&["3"]), "fünf", false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QualityError::Validation(Verdict::TypeMismatch { .. })
        ));
        assert!(fake.events().is_empty());
    }

    #[tokio::test]
    async fn test_unify_requires_values() {
        let fake = FakeConnector::new(Dialect::MariaDb);
        let schema = semester_schema(Dialect::MariaDb);
        let err = UnifyEngine::new(&fake, &schema)
            .unify("Semester", &[], "5", false)
            .await
            .unwrap_err();
        assert!(matches!(err, QualityError::QueryBuild(_)));
    }

    #[tokio::test]
    async fn test_unify_text_column_dry_run() {
        let fake = FakeConnector::new(Dialect::MariaDb);
        let mut pk = make_test_column("id", "int", TypeBucket::Integer);
        pk.is_nullable = false;
        let schema = TableSchema::new(
            Dialect::MariaDb,
            "uni",
            "faecher",
            vec![pk, make_test_column("fach", "varchar(40)", TypeBucket::Text)],
            vec!["id".to_string()],
            2,
        )
        .unwrap();
        fake.push_rows(&["fach"], vec![vec![text("Mathe")]]);
        fake.push_affected(1);
        fake.push_affected(2);

        let updated = UnifyEngine::new(&fake, &schema)
            .unify("fach", &values(&["Mathe", "Mathematik "]), "Mathematik", false)
            .await
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(fake.count(&Event::Rollback), 2);
        assert_eq!(
            fake.statements().pop().unwrap().param("v1"),
            Some(&text("Mathematik "))
        );
    }

    // ========================================================================
    // Whole-value trial update
    // ========================================================================

    fn faecher_schema() -> TableSchema {
        let mut pk = make_test_column("id", "integer", TypeBucket::Integer);
        pk.is_nullable = false;
        TableSchema::new(
            Dialect::Postgres,
            "uni",
            "faecher",
            vec![pk, make_test_column("fach", "text", TypeBucket::Text)],
            vec!["id".to_string()],
            3,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unify_into_existing_unique_value_is_validation_error() {
        // faecher(id PK, fach UNIQUE) = {Mathematik, Mathe, Physik}
        let fake = FakeConnector::new(Dialect::Postgres);
        let schema = faecher_schema();
        fake.push_rows(&["fach"], vec![vec![text("Mathe")]]);
        fake.push_error(
            "duplicate key value violates unique constraint \"faecher_fach_key\"",
        );

        let err = UnifyEngine::new(&fake, &schema)
            .unify("fach", &values(&["Mathe"]), "Physik", true)
            .await
            .unwrap_err();
        match err {
            QualityError::Validation(Verdict::UniqueViolation { column, value, .. }) => {
                assert_eq!(column, "fach");
                assert_eq!(value, "Physik");
            }
            other => panic!("expected UniqueViolation, got {other:?}"),
        }
        assert_eq!(fake.count(&Event::Commit), 0);
        assert_eq!(fake.count(&Event::Rollback), 1);

        let statements = fake.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].sql,
            "SELECT \"fach\" FROM \"faecher\" WHERE \"fach\" = :v0 LIMIT 1"
        );
        assert_eq!(statements[0].param("v0"), Some(&text("Mathe")));
    }

    #[tokio::test]
    async fn test_trial_update_matches_unify_statement() {
        let fake = FakeConnector::new(Dialect::Postgres);
        let schema = faecher_schema();
        let old = values(&["Mathe", "Mathematik "]);
        fake.push_rows(&["fach"], vec![vec![text("Mathe")]]);
        fake.push_affected(2);
        fake.push_affected(2);

        UnifyEngine::new(&fake, &schema)
            .unify("fach", &old, "Mathematik", true)
            .await
            .unwrap();

        let statements = fake.statements();
        assert_eq!(statements.len(), 3);
        let (trial, real) = (&statements[1], &statements[2]);
        assert_eq!(
            trial.sql,
            "UPDATE \"faecher\" SET \"fach\" = :new WHERE \"fach\" = :v0 OR \"fach\" = :v1"
        );
        assert_eq!(trial.sql, real.sql);
        assert_eq!(trial.params, real.params);
        assert!(!trial.sql.contains("regexp_replace"));
    }

    #[tokio::test]
    async fn test_unify_value_not_found() {
        let fake = FakeConnector::new(Dialect::Postgres);
        let schema = faecher_schema();
        fake.push_rows(&["fach"], vec![]);

        let err = UnifyEngine::new(&fake, &schema)
            .unify("fach", &values(&["Chemie"]), "Physik", true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QualityError::Validation(Verdict::ValueNotFound { .. })
        ));
        assert_eq!(fake.count(&Event::Begin), 0);
    }
}
