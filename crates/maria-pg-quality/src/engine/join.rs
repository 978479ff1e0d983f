//! Joining two tables that may live on different servers.
//!
//! When both tables are reachable from one connection the join is a single
//! native SQL statement. Otherwise both sides are fetched and joined in
//! memory on normalized key values. Either way the result reports how many
//! rows of each table found no partner, so that
//! `full outer rows == inner rows + unmatched(first) + unmatched(second)`.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::core::identifier::qualify;
use crate::core::schema::{ColumnInfo, ColumnSelection, TableSchema, TypeBucket};
use crate::core::traits::{Connector, Statement};
use crate::core::value::SqlValue;
use crate::dialect::Dialect;
use crate::error::{QualityError, Result};

use super::{as_count, parse_boolean, primary_key_list, table_ref};

/// Which join column is cast to the other's type when their buckets differ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CastDirection {
    /// Cast towards the more general bucket.
    #[default]
    Auto,
    /// Cast the second table's column to the first table's type (code 1).
    ToFirst,
    /// Cast the first table's column to the second table's type (code 2).
    ToSecond,
}

impl CastDirection {
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(CastDirection::Auto),
            1 => Ok(CastDirection::ToFirst),
            2 => Ok(CastDirection::ToSecond),
            other => Err(QualityError::QueryBuild(format!(
                "Unknown cast direction {} (expected 0, 1 or 2)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    /// Join column of the first table, then of the second.
    pub join_columns: Vec<String>,
    pub select_first: ColumnSelection,
    pub select_second: ColumnSelection,
    pub cast: CastDirection,
    pub full_outer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// One native SQL join on a shared connection.
    SameServer,
    /// Both tables fetched and joined in memory.
    Federated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedCount {
    pub table: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinResult {
    /// `table.column` labels, first table's selection then the second's.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    /// First table, then second table.
    pub unmatched: Vec<UnmatchedCount>,
    pub strategy: JoinStrategy,
}

impl JoinResult {
    pub fn unmatched_in(&self, table: &str) -> Option<u64> {
        self.unmatched
            .iter()
            .find(|u| u.table == table)
            .map(|u| u.count)
    }
}

/// One side of a join.
#[derive(Clone, Copy)]
pub struct JoinSide<'a> {
    pub connector: &'a dyn Connector,
    pub schema: &'a TableSchema,
}

impl<'a> JoinSide<'a> {
    pub fn new(connector: &'a dyn Connector, schema: &'a TableSchema) -> Self {
        Self { connector, schema }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CastSide {
    First,
    Second,
}

/// Resolved join columns and the side whose key is cast, if any.
struct JoinKeys<'s> {
    first: &'s ColumnInfo,
    second: &'s ColumnInfo,
    cast: Option<CastSide>,
}

impl JoinKeys<'_> {
    /// Bucket both keys are compared in.
    fn bucket(&self) -> TypeBucket {
        match self.cast {
            Some(CastSide::First) => self.second.bucket,
            _ => self.first.bucket,
        }
    }
}

/// Generality order used by [`CastDirection::Auto`].
fn generality(bucket: TypeBucket) -> u8 {
    match bucket {
        TypeBucket::Text => 4,
        TypeBucket::Decimal => 3,
        TypeBucket::Integer => 2,
        TypeBucket::Boolean => 1,
        TypeBucket::Date => 0,
    }
}

fn resolve_cast(
    first: &ColumnInfo,
    second: &ColumnInfo,
    direction: CastDirection,
) -> Result<Option<CastSide>> {
    if first.bucket == second.bucket {
        return Ok(None);
    }
    match direction {
        CastDirection::ToFirst => Ok(Some(CastSide::Second)),
        CastDirection::ToSecond => Ok(Some(CastSide::First)),
        CastDirection::Auto => {
            let has_date = first.bucket == TypeBucket::Date || second.bucket == TypeBucket::Date;
            let has_text = first.bucket.is_text() || second.bucket.is_text();
            if has_date && !has_text {
                return Err(QualityError::QueryBuild(format!(
                    "Cannot join {} column '{}' with {} column '{}' without an explicit cast direction",
                    first.bucket, first.name, second.bucket, second.name
                )));
            }
            if generality(first.bucket) >= generality(second.bucket) {
                Ok(Some(CastSide::Second))
            } else {
                Ok(Some(CastSide::First))
            }
        }
    }
}

pub struct JoinEngine<'a> {
    first: JoinSide<'a>,
    second: JoinSide<'a>,
}

impl<'a> JoinEngine<'a> {
    pub fn new(first: JoinSide<'a>, second: JoinSide<'a>) -> Self {
        Self { first, second }
    }

    /// Whether one native statement can join both tables.
    ///
    /// PostgreSQL cannot cross databases inside one connection.
    pub fn is_same_server(&self) -> bool {
        let a = self.first.connector.target();
        let b = self.second.connector.target();
        a.is_same_server(b) && (a.dialect == Dialect::MariaDb || a.database == b.database)
    }

    /// Join with whichever strategy the two targets allow.
    pub async fn join(&self, request: &JoinRequest) -> Result<JoinResult> {
        if self.is_same_server() {
            self.join_same_server(request).await
        } else {
            self.join_federated(request).await
        }
    }

    fn keys(&self, request: &JoinRequest) -> Result<JoinKeys<'a>> {
        let [first, second] = request.join_columns.as_slice() else {
            return Err(QualityError::QueryBuild(format!(
                "A join needs exactly two columns, got {}",
                request.join_columns.len()
            )));
        };
        let first = self.first.schema.column(first)?;
        let second = self.second.schema.column(second)?;
        let cast = resolve_cast(first, second, request.cast)?;
        Ok(JoinKeys { first, second, cast })
    }

    /// Selected columns of both sides and their `table.column` labels.
    #[allow(clippy::type_complexity)]
    fn labels(
        &self,
        request: &JoinRequest,
    ) -> Result<(Vec<&'a ColumnInfo>, Vec<&'a ColumnInfo>, Vec<String>)> {
        let first = self.first.schema.resolve(&request.select_first)?;
        let second = self.second.schema.resolve(&request.select_second)?;
        let labels = first
            .iter()
            .map(|c| format!("{}.{}", self.first.schema.name, c.name))
            .chain(
                second
                    .iter()
                    .map(|c| format!("{}.{}", self.second.schema.name, c.name)),
            )
            .collect();
        Ok((first, second, labels))
    }

    fn unmatched(&self, first: u64, second: u64) -> Vec<UnmatchedCount> {
        vec![
            UnmatchedCount {
                table: self.first.schema.name.clone(),
                count: first,
            },
            UnmatchedCount {
                table: self.second.schema.name.clone(),
                count: second,
            },
        ]
    }

    /// One native join on the first table's connection.
    #[instrument(skip(self, request), fields(first = %self.first.schema.name, second = %self.second.schema.name))]
    pub async fn join_same_server(&self, request: &JoinRequest) -> Result<JoinResult> {
        let keys = self.keys(request)?;
        let (select_first, select_second, columns) = self.labels(request)?;
        let dialect = self.first.schema.dialect;

        let (t1, t2) = match dialect {
            Dialect::MariaDb => (
                qualify(&self.first.schema.database, &self.first.schema.name),
                qualify(&self.second.schema.database, &self.second.schema.name),
            ),
            Dialect::Postgres => (table_ref(self.first.schema), table_ref(self.second.schema)),
        };

        let k1 = format!("j1.{}", dialect.quote_ident(&keys.first.name));
        let k2 = format!("j2.{}", dialect.quote_ident(&keys.second.name));
        // A key the cast cannot convert becomes NULL and matches nothing, as
        // in the federated join.
        let (k1, k2) = match keys.cast {
            None => (k1, k2),
            Some(CastSide::First) => (dialect.guarded_cast_to(&k1, keys.second), k2),
            Some(CastSide::Second) => (k1, dialect.guarded_cast_to(&k2, keys.first)),
        };
        let on = format!("{} = {}", k1, k2);

        let selection = select_first
            .iter()
            .map(|c| format!("j1.{}", dialect.quote_ident(&c.name)))
            .chain(
                select_second
                    .iter()
                    .map(|c| format!("j2.{}", dialect.quote_ident(&c.name))),
            )
            .collect::<Vec<_>>()
            .join(", ");

        let sql = if !request.full_outer {
            format!("SELECT {} FROM {} j1 INNER JOIN {} j2 ON {}", selection, t1, t2, on)
        } else if dialect.has_full_outer_join() {
            format!("SELECT {} FROM {} j1 FULL OUTER JOIN {} j2 ON {}", selection, t1, t2, on)
        } else {
            let first_pk = primary_key_list(self.first.schema, Some("j1"))
                .split(", ")
                .map(|pk| format!("{} IS NULL", pk))
                .collect::<Vec<_>>()
                .join(" AND ");
            format!(
                "SELECT {sel} FROM {t1} j1 LEFT JOIN {t2} j2 ON {on} \
                 UNION ALL SELECT {sel} FROM {t1} j1 RIGHT JOIN {t2} j2 ON {on} WHERE {first_pk}",
                sel = selection,
                t1 = t1,
                t2 = t2,
                on = on,
                first_pk = first_pk
            )
        };
        let counts_sql = format!(
            "SELECT \
             (SELECT COUNT(*) FROM {t1} j1 WHERE NOT EXISTS (SELECT 1 FROM {t2} j2 WHERE {on})) AS unmatched_first, \
             (SELECT COUNT(*) FROM {t2} j2 WHERE NOT EXISTS (SELECT 1 FROM {t1} j1 WHERE {on})) AS unmatched_second",
            t1 = t1,
            t2 = t2,
            on = on
        );
        debug!("Join: {}", sql);

        let mut conn = self.first.connector.acquire().await?;
        let rows = conn.execute(&Statement::new(sql)).await?.rows;
        let counts = conn.execute(&Statement::new(counts_sql)).await?;
        let count_at = |i: usize| {
            counts
                .rows
                .first()
                .and_then(|row| row.get(i))
                .map(as_count)
                .unwrap_or(0)
        };
        let unmatched = self.unmatched(count_at(0), count_at(1));

        info!(
            "Joined {} and {} on one server: {} rows",
            self.first.schema.name,
            self.second.schema.name,
            rows.len()
        );
        Ok(JoinResult {
            columns,
            rows,
            unmatched,
            strategy: JoinStrategy::SameServer,
        })
    }

    /// Fetch both tables and join them in memory.
    ///
    /// Keys are normalized into the bucket chosen by the cast direction; a
    /// key that cannot be converted matches nothing.
    #[instrument(skip(self, request), fields(first = %self.first.schema.name, second = %self.second.schema.name))]
    pub async fn join_federated(&self, request: &JoinRequest) -> Result<JoinResult> {
        let keys = self.keys(request)?;
        let (select_first, select_second, columns) = self.labels(request)?;
        let bucket = keys.bucket();

        let left = fetch_side(self.first, keys.first, &select_first).await?;
        let right = fetch_side(self.second, keys.second, &select_second).await?;

        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, (key, _)) in right.iter().enumerate() {
            if let Some(key) = key.as_ref().and_then(|k| join_key(k, bucket)) {
                index.entry(key).or_default().push(i);
            }
        }

        let mut rows = Vec::new();
        let mut right_matched = vec![false; right.len()];
        let mut unmatched_first = 0u64;
        for (key, values) in &left {
            let partners = key
                .as_ref()
                .and_then(|k| join_key(k, bucket))
                .and_then(|k| index.get(&k));
            match partners {
                Some(partners) => {
                    for &i in partners {
                        right_matched[i] = true;
                        let mut row = values.clone();
                        row.extend(right[i].1.iter().cloned());
                        rows.push(row);
                    }
                }
                None => {
                    unmatched_first += 1;
                    if request.full_outer {
                        let mut row = values.clone();
                        row.resize(values.len() + select_second.len(), SqlValue::Null);
                        rows.push(row);
                    }
                }
            }
        }

        let mut unmatched_second = 0u64;
        for (i, (_, values)) in right.iter().enumerate() {
            if right_matched[i] {
                continue;
            }
            unmatched_second += 1;
            if request.full_outer {
                let mut row = vec![SqlValue::Null; select_first.len()];
                row.extend(values.iter().cloned());
                rows.push(row);
            }
        }

        info!(
            "Joined {} ({} rows) and {} ({} rows) in memory: {} rows",
            self.first.schema.name,
            left.len(),
            self.second.schema.name,
            right.len(),
            rows.len()
        );
        Ok(JoinResult {
            columns,
            rows,
            unmatched: self.unmatched(unmatched_first, unmatched_second),
            strategy: JoinStrategy::Federated,
        })
    }
}

/// Rows of one side as `(join key, selected values)`, ordered by primary key.
async fn fetch_side(
    side: JoinSide<'_>,
    key: &ColumnInfo,
    selected: &[&ColumnInfo],
) -> Result<Vec<(Option<SqlValue>, Vec<SqlValue>)>> {
    let schema = side.schema;
    let dialect = schema.dialect;
    let columns = std::iter::once(key)
        .chain(selected.iter().copied())
        .map(|c| dialect.quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM {} ORDER BY {}",
        columns,
        table_ref(schema),
        primary_key_list(schema, None)
    );
    let mut conn = side.connector.acquire().await?;
    let result = conn.execute(&Statement::new(sql)).await?;
    Ok(result
        .rows
        .into_iter()
        .map(|mut row| {
            let values = row.split_off(1.min(row.len()));
            (row.pop(), values)
        })
        .collect())
}

/// Canonical text of `value` in `bucket`, or `None` if it has no such form.
fn join_key(value: &SqlValue, bucket: TypeBucket) -> Option<String> {
    if value.is_null() {
        return None;
    }
    match bucket {
        TypeBucket::Text | TypeBucket::Date => value.as_text(),
        TypeBucket::Integer => match value {
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Bool(b) => Some(i64::from(*b).to_string()),
            other => decimal_of(other)
                .filter(|d| d.fract().is_zero())
                .map(|d| d.trunc().normalize().to_string()),
        },
        TypeBucket::Decimal => decimal_of(value).map(|d| d.normalize().to_string()),
        TypeBucket::Boolean => match value {
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Int(0) => Some("false".into()),
            SqlValue::Int(1) => Some("true".into()),
            other => other
                .as_text()
                .and_then(|t| parse_boolean(t.trim()))
                .map(|b| b.to_string()),
        },
    }
}

fn decimal_of(value: &SqlValue) -> Option<Decimal> {
    match value {
        SqlValue::Decimal(d) => Some(*d),
        SqlValue::Int(i) => Some(Decimal::from(*i)),
        SqlValue::Float(f) => Decimal::try_from(*f).ok(),
        SqlValue::Text(t) => t.trim().parse().ok(),
        _ => None,
    }
}
