//! SQL Server session implementation.
//!
//! Implements [`SqlSession`] over Tiberius with bb8 connection pooling.

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use futures::TryStreamExt;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Row, ToSql};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::core::statement::Statement;
use crate::core::traits::{RowBatch, SqlSession};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

use super::convert::{
    build_insert_sql, convert_row_value, row_i64, rows_per_insert, sql_value_to_sql_param,
};

/// Connection pool timeouts.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub(crate) struct TiberiusConnectionManager {
    config: DatabaseConfig,
}

impl TiberiusConnectionManager {
    fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }
        if self.config.trust_server_cert {
            config.trust_cert();
        }

        config
    }
}

fn io_error(e: std::io::Error, context: &str) -> tiberius::error::Error {
    tiberius::error::Error::Io {
        kind: e.kind(),
        message: format!("{}: {}", context, e),
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| io_error(e, "connecting"))?;
        tcp.set_nodelay(true).ok();

        let std_tcp = tcp
            .into_std()
            .map_err(|e| io_error(e, "detaching socket"))?;
        let socket = socket2::Socket::from(std_tcp);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(TCP_KEEPALIVE_INTERVAL)
            .with_interval(TCP_KEEPALIVE_INTERVAL);
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to set TCP keepalive on MSSQL connection: {}", e);
        }

        let std_tcp: std::net::TcpStream = socket.into();
        std_tcp.set_nonblocking(true).ok();
        let tcp = TcpStream::from_std(std_tcp).map_err(|e| io_error(e, "converting socket"))?;

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// A pooled SQL Server session for one database.
pub struct MssqlSession {
    pool: Pool<TiberiusConnectionManager>,
    label: String,
    insert_batch_rows: usize,
}

impl MssqlSession {
    /// Connect to the database with a pool of `max_size` connections.
    ///
    /// `label` names the role of the database ("source", "destination") in
    /// logs and errors.
    pub async fn connect(config: &DatabaseConfig, max_size: u32, label: &str) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e, format!("creating MSSQL {} pool", label)))?;

        // Test connection
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e, format!("testing MSSQL {} connection", label)))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to MSSQL {}: {}:{}/{} (pool_size={})",
            label, config.host, config.port, config.database, max_size
        );

        Ok(Self {
            pool,
            label: label.to_string(),
            insert_batch_rows: 1_000,
        })
    }

    /// Upper bound of rows per INSERT statement.
    pub fn with_insert_batch_rows(mut self, rows: usize) -> Self {
        self.insert_batch_rows = rows.max(1);
        self
    }

    /// Get a pooled connection.
    async fn get_conn(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, format!("getting MSSQL {} connection", self.label)))
    }

    /// Run a metadata query with string parameters and return raw rows.
    pub(crate) async fn query_raw(&self, sql: &str, params: &[&str]) -> Result<Vec<Row>> {
        let mut conn = self.get_conn().await?;
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let stream = conn.query(sql, &refs).await?;
        Ok(stream.into_first_result().await?)
    }

    async fn insert_batches(
        conn: &mut PooledConnection<'_, TiberiusConnectionManager>,
        qualified_table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue<'static>>],
        max_rows: usize,
    ) -> Result<u64> {
        let mut total_inserted = 0u64;

        for batch in rows.chunks(rows_per_insert(columns.len(), max_rows)) {
            let sql = build_insert_sql(qualified_table, columns, batch.len());
            let params: Vec<Box<dyn ToSql>> = batch
                .iter()
                .flat_map(|row| row.iter().map(sql_value_to_sql_param))
                .collect();
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            conn.execute(sql.as_str(), &param_refs).await.map_err(|e| {
                MigrateError::transport(qualified_table, format!("batched INSERT: {}", e))
            })?;
            total_inserted += batch.len() as u64;
        }

        Ok(total_inserted)
    }

    /// Insert `first` and every further batch on `rx` over one connection.
    async fn insert_all(
        conn: &mut PooledConnection<'_, TiberiusConnectionManager>,
        qualified_table: &str,
        columns: &[String],
        first: RowBatch,
        rx: &mut mpsc::Receiver<RowBatch>,
        max_rows: usize,
    ) -> Result<u64> {
        let mut total_inserted =
            Self::insert_batches(conn, qualified_table, columns, &first, max_rows).await?;
        while let Some(batch) = rx.recv().await {
            total_inserted +=
                Self::insert_batches(conn, qualified_table, columns, &batch, max_rows).await?;
        }
        Ok(total_inserted)
    }
}

#[async_trait]
impl SqlSession for MssqlSession {
    async fn execute(&self, stmt: &Statement) -> Result<u64> {
        let mut conn = self.get_conn().await?;
        debug!("[{}] {}", self.label, stmt.sql);
        let result = conn.execute(stmt.sql.as_str(), &[]).await?;
        Ok(result.total())
    }

    async fn query_i64(&self, stmt: &Statement) -> Result<Option<i64>> {
        let mut conn = self.get_conn().await?;
        debug!("[{}] {}", self.label, stmt.sql);
        let row = conn.query(stmt.sql.as_str(), &[]).await?.into_row().await?;
        match row {
            Some(row) => Ok(row_i64(&row, 0)),
            None => Ok(None),
        }
    }

    async fn stream_rows(
        &self,
        stmt: &Statement,
        col_types: &[String],
        batch_rows: usize,
        tx: mpsc::Sender<RowBatch>,
    ) -> Result<u64> {
        let batch_rows = batch_rows.max(1);
        let mut conn = self.get_conn().await?;
        debug!("[{}] {}", self.label, stmt.sql);
        let mut stream = conn.query(stmt.sql.as_str(), &[]).await?.into_row_stream();

        let mut batch = Vec::with_capacity(batch_rows);
        let mut total_rows = 0u64;
        while let Some(row) = stream.try_next().await? {
            let values = col_types
                .iter()
                .enumerate()
                .map(|(idx, data_type)| convert_row_value(&row, idx, data_type))
                .collect::<Result<Vec<_>>>()?;
            batch.push(values);
            total_rows += 1;

            if batch.len() >= batch_rows {
                if tx.send(std::mem::take(&mut batch)).await.is_err() {
                    return Err(MigrateError::transport(
                        &self.label,
                        "channel closed while sending batch",
                    ));
                }
                batch = Vec::with_capacity(batch_rows);
            }
        }

        if !batch.is_empty() && tx.send(batch).await.is_err() {
            return Err(MigrateError::transport(
                &self.label,
                "channel closed while sending final batch",
            ));
        }
        Ok(total_rows)
    }

    async fn insert_stream(
        &self,
        qualified_table: &str,
        columns: &[String],
        identity_insert: bool,
        mut rx: mpsc::Receiver<RowBatch>,
    ) -> Result<u64> {
        let Some(first) = rx.recv().await else {
            return Ok(0);
        };
        if columns.is_empty() {
            return Err(MigrateError::transport(
                qualified_table,
                "Cannot insert with zero columns",
            ));
        }

        // IDENTITY_INSERT is session state: toggle and insert on one connection
        let mut conn = self.get_conn().await?;
        if identity_insert {
            conn.simple_query(format!("SET IDENTITY_INSERT {} ON", qualified_table))
                .await?
                .into_results()
                .await?;
        }

        let result = Self::insert_all(
            &mut conn,
            qualified_table,
            columns,
            first,
            &mut rx,
            self.insert_batch_rows,
        )
        .await;

        if identity_insert {
            let off = conn
                .simple_query(format!("SET IDENTITY_INSERT {} OFF", qualified_table))
                .await;
            match off {
                Ok(stream) => {
                    stream.into_results().await?;
                }
                Err(e) => warn!(
                    "Failed to turn IDENTITY_INSERT off for {}: {}",
                    qualified_table, e
                ),
            }
        }

        result
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    async fn close(&self) {
        // bb8 pools close when dropped
    }
}
