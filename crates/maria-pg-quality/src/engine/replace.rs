//! Substring and whole-value replacement.
//!
//! Text columns are rewritten with the dialect's `regexp_replace`, using a
//! regex that matches the old substring literally. Non-text columns have no
//! substrings: a cell is replaced only when its whole value equals the old
//! value parsed into the column's bucket.
//!
//! Every replacement is preceded by a dry run. [`ReplaceEngine::replace_all`]
//! with `commit = false` performs the real `UPDATE`, reads the resulting rows
//! back and rolls back. [`ReplaceEngine::compute_plan`] turns that into a
//! per-cell [`ReplacementPlan`] with numbered [`Occurrence`]s, and
//! [`ReplaceEngine::replace_selected`] applies a chosen subset one row at a
//! time so that a single constraint violation does not undo the rest.

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::schema::{ColumnInfo, ColumnSelection, TableSchema};
use crate::core::traits::{Connection, Connector, Statement};
use crate::core::value::{ResultSet, SqlValue};
use crate::dialect::Dialect;
use crate::error::{QualityError, Result};

use super::metadata::build_condition;
use super::{
    as_count, column_list, finish, is_flag_set, mutation_error, parse_for_bucket, primary_key_list,
    rollback_quietly, table_ref,
};

/// One matching cell found by a dry run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occurrence {
    /// 1-based, in row order then column order.
    pub id: usize,
    /// 1-based position of the row when ordered by primary key.
    pub row_no: u64,
    /// The row's primary-key tuple, in key order.
    pub primary_key: Vec<SqlValue>,
    pub column: String,
}

/// Old and new values of one row touched by a replacement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanEntry {
    pub row_no: u64,
    /// Full-width row before the replacement.
    pub old_values: Vec<SqlValue>,
    /// Per-column change mask.
    pub changed: Vec<bool>,
    /// New value for changed cells, `None` for the others.
    pub new_values: Vec<Option<SqlValue>>,
}

/// Result of a dry run, one entry per affected row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplacementPlan {
    pub columns: Vec<String>,
    pub entries: Vec<PlanEntry>,
}

impl ReplacementPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, row_no: u64) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.row_no == row_no)
    }
}

/// Tally of a selective replacement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaceSummary {
    pub selected: usize,
    pub succeeded: usize,
    /// Primary keys of the rows whose update failed.
    pub failed: Vec<Vec<SqlValue>>,
    pub committed: bool,
}

impl ReplaceSummary {
    pub fn message(&self) -> String {
        let suffix = if self.committed {
            ""
        } else {
            " (dry run, rolled back)"
        };
        if self.selected > 0 && self.succeeded == self.selected {
            format!("Replaced all {} selected occurrences{}", self.selected, suffix)
        } else if self.succeeded == 0 {
            "Nothing changed: no selected occurrence could be replaced".to_string()
        } else {
            let keys = self
                .failed
                .iter()
                .map(|pk| {
                    let parts = pk.iter().map(|v| v.to_string()).collect::<Vec<_>>();
                    format!("({})", parts.join(", "))
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "Replaced {} of {} selected occurrences{}; failed for primary keys {}",
                self.succeeded, self.selected, suffix, keys
            )
        }
    }
}

/// Pick occurrences by id, in the order given.
pub fn select_occurrences(occurrences: &[Occurrence], ids: &[usize]) -> Result<Vec<Occurrence>> {
    ids.iter()
        .map(|id| {
            occurrences
                .iter()
                .find(|o| o.id == *id)
                .cloned()
                .ok_or_else(|| {
                    QualityError::QueryBuild(format!(
                        "Unknown occurrence {} (plan has {})",
                        id,
                        occurrences.len()
                    ))
                })
        })
        .collect()
}

/// Match condition and replacement expression for one column.
#[derive(Debug)]
struct CellEdit {
    index: usize,
    matches: String,
    replaced: String,
}

/// Edits for a set of columns plus the values they bind.
#[derive(Debug, Default)]
struct EditSet {
    edits: Vec<CellEdit>,
    params: Vec<(String, SqlValue)>,
}

impl EditSet {
    fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    fn bind(&self, statement: Statement) -> Statement {
        self.params
            .iter()
            .fold(statement, |s, (name, value)| s.bind(name.clone(), value.clone()))
    }

    fn edit_for(&self, index: usize) -> Option<&CellEdit> {
        self.edits.iter().find(|e| e.index == index)
    }

    /// `(m1) OR (m2) ...`
    fn any_match(&self) -> String {
        self.edits
            .iter()
            .map(|e| format!("({})", e.matches))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    fn assignments(&self, schema: &TableSchema) -> String {
        self.edits
            .iter()
            .map(|e| {
                let name = &schema.columns()[e.index].name;
                format!("{} = {}", schema.dialect.quote_ident(name), e.replaced)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub struct ReplaceEngine<'a> {
    connector: &'a dyn Connector,
    schema: &'a TableSchema,
}

impl<'a> ReplaceEngine<'a> {
    pub fn new(connector: &'a dyn Connector, schema: &'a TableSchema) -> Self {
        Self { connector, schema }
    }

    fn dialect(&self) -> Dialect {
        self.schema.dialect
    }

    /// Replace `old` with `new` in every selected column with one `UPDATE`.
    ///
    /// Returns the affected rows as they are after the update. With
    /// `commit = false` the update is rolled back after reading them back.
    #[instrument(skip(self, columns), fields(table = %self.schema.name))]
    pub async fn replace_all(
        &self,
        columns: &ColumnSelection,
        old: &str,
        new: &str,
        commit: bool,
    ) -> Result<ResultSet> {
        let selected = self.schema.resolve(columns)?;
        let edits = self.edits(&selected, old, new)?;
        let mut conn = self.connector.acquire().await?;
        self.apply(conn.as_mut(), &edits, commit).await
    }

    /// Dry-run the replacement over the included columns and describe every
    /// matching cell.
    ///
    /// `included` holds one flag per table column, in table order.
    #[instrument(skip(self, included), fields(table = %self.schema.name))]
    pub async fn compute_plan(
        &self,
        included: &[bool],
        old: &str,
        new: &str,
    ) -> Result<(ReplacementPlan, Vec<Occurrence>)> {
        let columns = self.schema.columns();
        if included.len() != columns.len() {
            return Err(QualityError::QueryBuild(format!(
                "Expected {} inclusion flags for table '{}', got {}",
                columns.len(),
                self.schema.name,
                included.len()
            )));
        }
        let selected: Vec<&ColumnInfo> = columns
            .iter()
            .zip(included)
            .filter_map(|(c, flag)| (*flag).then_some(c))
            .collect();
        if selected.is_empty() {
            return Err(QualityError::QueryBuild(
                "At least one column must be included".to_string(),
            ));
        }

        let edits = self.edits(&selected, old, new)?;
        let mut conn = self.connector.acquire().await?;

        let names = self.schema.column_names().iter().map(|s| s.to_string()).collect();
        if edits.is_empty() {
            return Ok((ReplacementPlan { columns: names, entries: Vec::new() }, Vec::new()));
        }

        let replaced = self.apply(conn.as_mut(), &edits, false).await?;

        let flags = edits
            .edits
            .iter()
            .enumerate()
            .map(|(j, e)| {
                format!(
                    "CASE WHEN {} THEN 1 ELSE 0 END AS m_{}, {} AS n_{}",
                    e.matches, j, e.replaced, j
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let any_flag = (0..edits.edits.len())
            .map(|j| format!("m_{} = 1", j))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT * FROM (SELECT ROW_NUMBER() OVER (ORDER BY {}) AS row_no, {}, {} FROM {}) sub \
             WHERE {} ORDER BY row_no",
            primary_key_list(self.schema, None),
            column_list(self.schema),
            flags,
            table_ref(self.schema),
            any_flag
        );
        let statement = edits.bind(Statement::new(sql));
        debug!("Plan query: {}", statement.sql);
        let rows = conn.execute(&statement).await?.rows;

        let width = columns.len();
        let pk_indices = self.schema.primary_key_indices();
        let mut plan = ReplacementPlan { columns: names, entries: Vec::with_capacity(rows.len()) };
        let mut occurrences = Vec::new();

        for row in rows {
            let row_no = row.first().map(as_count).unwrap_or(0);
            let old_values: Vec<SqlValue> = row.iter().skip(1).take(width).cloned().collect();
            let mut changed = vec![false; width];
            let mut new_values = vec![None; width];
            for (j, edit) in edits.edits.iter().enumerate() {
                let flag = row.get(1 + width + 2 * j).is_some_and(is_flag_set);
                if flag {
                    changed[edit.index] = true;
                    new_values[edit.index] = row.get(2 + width + 2 * j).cloned();
                }
            }

            let primary_key: Vec<SqlValue> = pk_indices
                .iter()
                .filter_map(|i| old_values.get(*i).cloned())
                .collect();
            for (index, _) in changed.iter().enumerate().filter(|(_, c)| **c) {
                occurrences.push(Occurrence {
                    id: occurrences.len() + 1,
                    row_no,
                    primary_key: primary_key.clone(),
                    column: columns[index].name.clone(),
                });
            }
            plan.entries.push(PlanEntry { row_no, old_values, changed, new_values });
        }

        if plan.len() != replaced.len() {
            warn!(
                "Dry run changed {} rows but the plan lists {}",
                replaced.len(),
                plan.len()
            );
        }
        info!(
            "Plan for '{}' -> '{}': {} occurrences in {} rows",
            old,
            new,
            occurrences.len(),
            plan.len()
        );
        Ok((plan, occurrences))
    }

    /// Apply the replacement to each selected occurrence with its own
    /// `UPDATE`, keyed by the full primary key, and commit or roll back each
    /// one individually.
    #[instrument(skip(self, occurrences), fields(table = %self.schema.name, selected = occurrences.len()))]
    pub async fn replace_selected(
        &self,
        occurrences: &[Occurrence],
        old: &str,
        new: &str,
        commit: bool,
    ) -> Result<ReplaceSummary> {
        let dialect = self.dialect();
        let pk_names: Vec<&str> = self.schema.primary_key().iter().map(String::as_str).collect();
        let key_condition = build_condition(dialect, &pk_names, Some("AND"))?;

        let mut conn = self.connector.acquire().await?;

        let mut summary = ReplaceSummary {
            selected: occurrences.len(),
            succeeded: 0,
            failed: Vec::new(),
            committed: commit,
        };

        for occurrence in occurrences {
            let column = self.schema.column(&occurrence.column)?;
            if occurrence.primary_key.len() != pk_names.len() {
                return Err(QualityError::QueryBuild(format!(
                    "Occurrence {} carries {} key values, table '{}' has {} key columns",
                    occurrence.id,
                    occurrence.primary_key.len(),
                    self.schema.name,
                    pk_names.len()
                )));
            }

            let edits = self.edits(&[column], old, new)?;
            let Some(edit) = edits.edits.first() else {
                debug!("Occurrence {}: value does not fit column {}", occurrence.id, column.name);
                summary.failed.push(occurrence.primary_key.clone());
                continue;
            };

            let sql = format!(
                "UPDATE {} SET {} WHERE {} AND ({})",
                table_ref(self.schema),
                edits.assignments(self.schema),
                key_condition,
                edit.matches
            );
            let statement = occurrence
                .primary_key
                .iter()
                .enumerate()
                .fold(edits.bind(Statement::new(sql)), |s, (i, v)| {
                    s.bind(format!("w{}", i), v.clone())
                });

            conn.begin().await?;
            let outcome = match conn.execute(&statement).await {
                Ok(_) => finish(conn.as_mut(), commit).await,
                Err(e) => {
                    rollback_quietly(conn.as_mut()).await;
                    Err(e)
                }
            };
            match outcome {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    warn!(
                        "Occurrence {} (key {:?}) failed: {}",
                        occurrence.id,
                        occurrence.primary_key,
                        e.driver_message()
                    );
                    summary.failed.push(occurrence.primary_key.clone());
                }
            }
        }

        info!("{}", summary.message());
        Ok(summary)
    }

    fn edits(&self, columns: &[&ColumnInfo], old: &str, new: &str) -> Result<EditSet> {
        let dialect = self.dialect();
        let mut set = EditSet::default();
        let mut text_bound = false;

        for column in columns {
            let index = self.schema.column_index(&column.name)?;
            let quoted = dialect.quote_ident(&column.name);
            if column.bucket.is_text() {
                set.edits.push(CellEdit {
                    index,
                    matches: dialect.exact_substring_predicate(&quoted, ":needle"),
                    replaced: dialect.regexp_replace(&quoted, ":pattern", ":replacement"),
                });
                if !text_bound {
                    set.params.push(("needle".into(), dialect.escape_pattern(old).into()));
                    set.params.push(("pattern".into(), dialect.literal_regex(old).into()));
                    set.params
                        .push(("replacement".into(), dialect.literal_replacement(new).into()));
                    text_bound = true;
                }
                continue;
            }

            match (parse_for_bucket(column, old), parse_for_bucket(column, new)) {
                (Some(old_value), Some(new_value)) => {
                    let matches = format!("{} = :old_{}", quoted, index);
                    set.edits.push(CellEdit {
                        index,
                        replaced: format!(
                            "CASE WHEN {} THEN :new_{} ELSE {} END",
                            matches, index, quoted
                        ),
                        matches,
                    });
                    set.params.push((format!("old_{}", index), old_value));
                    set.params.push((format!("new_{}", index), new_value));
                }
                _ => debug!(
                    "Skipping {} column {}: '{}' -> '{}' is not a whole-value replacement",
                    column.bucket, column.name, old, new
                ),
            }
        }
        Ok(set)
    }

    /// Run the `UPDATE` inside a transaction, read the affected rows back by
    /// their new primary keys, then commit or roll back.
    async fn apply(
        &self,
        conn: &mut dyn Connection,
        edits: &EditSet,
        commit: bool,
    ) -> Result<ResultSet> {
        let schema = self.schema;
        let dialect = self.dialect();
        let names = schema.column_names().iter().map(|s| s.to_string()).collect();
        if edits.is_empty() {
            return Ok(ResultSet::new(names, Vec::new()));
        }

        let pk_indices = schema.primary_key_indices();
        let new_keys = pk_indices
            .iter()
            .map(|i| match edits.edit_for(*i) {
                Some(edit) => edit.replaced.clone(),
                None => dialect.quote_ident(&schema.columns()[*i].name),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let keys_sql = format!(
            "SELECT {} FROM {} WHERE {}",
            new_keys,
            table_ref(schema),
            edits.any_match()
        );
        let keys = conn.execute(&edits.bind(Statement::new(keys_sql))).await?.rows;
        if keys.is_empty() {
            debug!("No rows match; nothing to update");
            return Ok(ResultSet::new(names, Vec::new()));
        }

        let update = edits.bind(Statement::new(format!(
            "UPDATE {} SET {} WHERE {}",
            table_ref(schema),
            edits.assignments(schema),
            edits.any_match()
        )));
        debug!("Replace: {}", update.sql);

        conn.begin().await?;
        if let Err(e) = conn.execute(&update).await {
            rollback_quietly(conn).await;
            return Err(mutation_error(e));
        }

        let mut clauses = Vec::with_capacity(keys.len());
        let mut key_params = Vec::new();
        for (r, key) in keys.iter().enumerate() {
            let clause = pk_indices
                .iter()
                .zip(key)
                .enumerate()
                .map(|(k, (i, value))| {
                    let param = format!("k{}_{}", r, k);
                    let column = dialect.quote_ident(&schema.columns()[*i].name);
                    let clause = format!("{} = :{}", column, param);
                    key_params.push((param, value.clone()));
                    clause
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            clauses.push(format!("({})", clause));
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            column_list(schema),
            table_ref(schema),
            clauses.join(" OR "),
            primary_key_list(schema, None)
        );
        let statement = key_params
            .into_iter()
            .fold(Statement::new(sql), |s, (name, value)| s.bind(name, value));
        let rows = match conn.execute(&statement).await {
            Ok(result) => result.into_result_set(),
            Err(e) => {
                rollback_quietly(conn).await;
                return Err(e);
            }
        };

        finish(conn, commit).await?;
        info!(
            "Replaced in {} rows of {}{}",
            rows.len(),
            schema.name,
            if commit { "" } else { " (dry run)" }
        );
        Ok(rows)
    }
}
