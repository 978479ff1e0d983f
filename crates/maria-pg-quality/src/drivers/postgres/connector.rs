//! PostgreSQL connector backed by a deadpool pool.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::core::traits::{Connection, ConnectionTarget, Connector, QueryResult, Statement};
use crate::dialect::Dialect;
use crate::drivers::common::{postgres_tls, SslMode};
use crate::error::{QualityError, Result};

use super::convert::{decode_row, PgParam};

/// Pool of PostgreSQL connections.
pub struct PostgresConnector {
    pool: Pool,
    target: ConnectionTarget,
}

impl PostgresConnector {
    /// Create the pool. No connection is opened until the first `acquire`.
    pub fn new(config: &ConnectionConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port());
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("maria-pg-quality");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let pool = match postgres_tls(ssl_mode)? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns.max(1))
                    .build()
                    .map_err(|e| QualityError::pool(e.to_string(), "creating PostgreSQL pool"))?
            }
            Some(tls_connector) => {
                pg_config.ssl_mode(tokio_postgres::config::SslMode::Require);
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns.max(1))
                    .build()
                    .map_err(|e| QualityError::pool(e.to_string(), "creating PostgreSQL pool"))?
            }
        };

        Ok(Self {
            pool,
            target: ConnectionTarget::new(
                Dialect::Postgres,
                config.host.clone(),
                config.port(),
                config.database.clone(),
            ),
        })
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        let client = self.pool.get().await.map_err(|e| {
            QualityError::pool(
                e.to_string(),
                format!(
                    "connecting to PostgreSQL {}:{}",
                    self.target.host, self.target.port
                ),
            )
        })?;
        debug!(
            "Acquired PostgreSQL connection: {}:{}/{}",
            self.target.host, self.target.port, self.target.database
        );
        Ok(Box::new(PostgresConnection { client }))
    }

    async fn close(&self) {
        self.pool.close();
        info!("Closed PostgreSQL pool for {}", self.target.host);
    }
}

struct PostgresConnection {
    client: Object,
}

/// Server message when there is one, the client-side error text otherwise.
fn pg_message(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => db.message().to_string(),
        None => e.to_string(),
    }
}

impl PostgresConnection {
    async fn control(&mut self, sql: &str) -> Result<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| QualityError::database(pg_message(&e), sql))
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult> {
        let (sql, values) = statement.to_positional(Dialect::Postgres)?;
        debug!("PostgreSQL: {}", sql);

        let prepared = self
            .client
            .prepare_cached(&sql)
            .await
            .map_err(|e| QualityError::database(pg_message(&e), sql.clone()))?;

        let params: Vec<PgParam<'_>> = values.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        if prepared.columns().is_empty() {
            let rows_affected = self
                .client
                .execute(&prepared, &refs)
                .await
                .map_err(|e| QualityError::database(pg_message(&e), sql.clone()))?;
            return Ok(QueryResult::affected(rows_affected));
        }

        let columns = prepared
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = self
            .client
            .query(&prepared, &refs)
            .await
            .map_err(|e| QualityError::database(pg_message(&e), sql.clone()))?;

        let rows_affected = rows.len() as u64;
        Ok(QueryResult {
            columns,
            rows: rows.iter().map(decode_row).collect(),
            rows_affected,
        })
    }

    async fn begin(&mut self) -> Result<()> {
        self.control("BEGIN").await
    }

    async fn commit(&mut self) -> Result<()> {
        self.control("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.control("ROLLBACK").await
    }
}
