//! MariaDB connector backed by a `mysql_async` pool.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Row};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::core::traits::{Connection, ConnectionTarget, Connector, QueryResult, Statement};
use crate::core::value::SqlValue;
use crate::dialect::Dialect;
use crate::drivers::common::{mariadb_ssl_opts, SslMode};
use crate::error::{QualityError, Result};

use super::convert::{from_mysql_value, to_mysql_value, ColumnShape};

/// Pool of MariaDB connections.
///
/// Every pooled connection runs the dialect's session statements on creation,
/// so double-quoted identifiers and the utf8mb4 session charset hold on all
/// of them.
pub struct MysqlConnector {
    pool: Pool,
    target: ConnectionTarget,
}

impl MysqlConnector {
    /// Create the pool. No connection is opened until the first `acquire`.
    pub fn new(config: &ConnectionConfig, max_conns: usize) -> Result<Self> {
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        if !ssl_mode.is_encrypted() {
            debug!("MariaDB TLS is disabled for {}", config.host);
        }

        let init = Dialect::MariaDb
            .session_init()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port())
            .db_name(Some(config.database.clone()))
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .init(init);

        if let Some(ssl) = mariadb_ssl_opts(ssl_mode) {
            builder = builder.ssl_opts(ssl);
        }

        let constraints = PoolConstraints::new(1, max_conns.max(1)).ok_or_else(|| {
            QualityError::pool("invalid pool size", "creating MariaDB pool")
        })?;
        let pool_opts = PoolOpts::new().with_constraints(constraints);

        let opts: Opts = builder.pool_opts(pool_opts).into();

        Ok(Self {
            pool: Pool::new(opts),
            target: ConnectionTarget::new(
                Dialect::MariaDb,
                config.host.clone(),
                config.port(),
                config.database.clone(),
            ),
        })
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        let conn = self.pool.get_conn().await.map_err(|e| {
            QualityError::pool(
                e.to_string(),
                format!("connecting to MariaDB {}:{}", self.target.host, self.target.port),
            )
        })?;
        debug!(
            "Acquired MariaDB connection: {}:{}/{}",
            self.target.host, self.target.port, self.target.database
        );
        Ok(Box::new(MysqlConnection { conn }))
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            warn!("Failed to close MariaDB pool: {}", e);
        } else {
            info!("Closed MariaDB pool for {}", self.target.host);
        }
    }
}

struct MysqlConnection {
    conn: Conn,
}

impl MysqlConnection {
    async fn control(&mut self, sql: &str) -> Result<()> {
        self.conn
            .query_drop(sql)
            .await
            .map_err(|e| QualityError::database(e.to_string(), sql))
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult> {
        let (sql, values) = statement.to_positional(Dialect::MariaDb)?;
        debug!("MariaDB: {}", sql);

        let params = if values.is_empty() {
            Params::Empty
        } else {
            Params::Positional(values.iter().map(to_mysql_value).collect())
        };

        let mut result = self
            .conn
            .exec_iter(sql.as_str(), params)
            .await
            .map_err(|e| QualityError::database(e.to_string(), sql.clone()))?;

        let shapes: Vec<(String, ColumnShape)> = result
            .columns()
            .map(|cols| {
                cols.iter()
                    .map(|c| (c.name_str().into_owned(), ColumnShape::of(c)))
                    .collect()
            })
            .unwrap_or_default();

        let rows: Vec<Row> = result
            .collect()
            .await
            .map_err(|e| QualityError::database(e.to_string(), sql.clone()))?;
        let rows_affected = result.affected_rows();

        let rows = rows
            .iter()
            .map(|row| {
                shapes
                    .iter()
                    .enumerate()
                    .map(|(i, (_, shape))| {
                        row.as_ref(i)
                            .map(|v| from_mysql_value(v, *shape))
                            .unwrap_or(SqlValue::Null)
                    })
                    .collect()
            })
            .collect();

        Ok(QueryResult {
            columns: shapes.into_iter().map(|(name, _)| name).collect(),
            rows,
            rows_affected,
        })
    }

    async fn begin(&mut self) -> Result<()> {
        self.control("START TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<()> {
        self.control("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.control("ROLLBACK").await
    }
}
